//! Machine-level configuration
//!
//! Execution mode, working directories, and the staging retry knobs. The
//! defaults mirror the behavior of the reference deployment: 20 pull
//! attempts spaced 500 ms apart, and a shared remote root of `/work` inside
//! the engine container.

use std::path::PathBuf;
use std::time::Duration;

/// Smallest target element count the engine meshes reliably. Requests below
/// this are rejected as a caller error instead of silently accepted.
pub const MIN_TARGET_ELEMENTS: u64 = 20_000;

/// Default number of attempts when pulling a file out of a container.
pub const DEFAULT_PULL_ATTEMPTS: usize = 20;

/// Default fixed sleep between pull attempts.
pub const DEFAULT_PULL_INTERVAL: Duration = Duration::from_millis(500);

/// Default directory inside the engine container where inputs are staged
/// and outputs are produced.
pub const DEFAULT_REMOTE_ROOT: &str = "/work";

/// Where and how the remote engine instances run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Engine binaries installed on the local host
    #[default]
    LocalInstall,
    /// Engine running inside an isolated container; inputs and outputs are
    /// staged through the [`staging`](crate::staging) transport
    Container {
        /// Image the launcher starts workers from
        image: String,
    },
    /// Sessions were connected by the caller; the orchestrator launches
    /// nothing and tears down only what it is handed
    Connected,
}

impl ExecutionMode {
    /// Whether file staging is required before and after engine I/O.
    pub fn is_remote(&self) -> bool {
        matches!(self, ExecutionMode::Container { .. })
    }
}

/// Verbosity forwarded to each launched engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineLogLevel {
    Critical,
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

/// Options shared by every worker of one machine.
#[derive(Debug, Clone)]
pub struct MachineOptions {
    /// Directory where per-row artifacts (meshes, state files, the shared
    /// topology-init file) are read and written on the orchestrator side
    pub working_dir: PathBuf,
    /// Where engine instances execute
    pub mode: ExecutionMode,
    /// Log verbosity passed to each launched session
    pub log_level: EngineLogLevel,
    /// Bounded retry count for pulling files from a remote worker
    pub pull_attempts: usize,
    /// Fixed sleep between pull attempts
    pub pull_interval: Duration,
    /// Staging root inside the container
    pub remote_root: String,
}

impl MachineOptions {
    /// Options for a local-install machine working in `working_dir`.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            mode: ExecutionMode::default(),
            log_level: EngineLogLevel::default(),
            pull_attempts: DEFAULT_PULL_ATTEMPTS,
            pull_interval: DEFAULT_PULL_INTERVAL,
            remote_root: DEFAULT_REMOTE_ROOT.to_string(),
        }
    }

    /// Set the execution mode.
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the engine log verbosity.
    pub fn with_log_level(mut self, level: EngineLogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Override the staging retry budget.
    pub fn with_pull_retry(mut self, attempts: usize, interval: Duration) -> Self {
        self.pull_attempts = attempts;
        self.pull_interval = interval;
        self
    }
}
