//! The engine-session boundary
//!
//! The meshing engine itself is an opaque external collaborator. This module
//! pins down everything the orchestrator is allowed to ask of one engine
//! instance, and nothing else: blocking reads of geometry or saved state,
//! parameter mutation, the (slow) mesh-generation trigger, statistics and
//! geometry queries, artifact saves, and teardown.
//!
//! Launching is injected through [`SessionLauncher`] so that deployments can
//! bring their own process or container plumbing, and tests can bring mocks.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::MachineOptions;
use crate::error::Result;
use crate::staging::{ContainerControl, ContainerStaging};
use crate::stats::{Histogram, HistogramSpec, RowStatistics};

/// Well-known configuration object paths inside an engine session.
pub mod object_path {
    /// Root of the topology tree; unsuspending it triggers mesh generation.
    pub const TOPOLOGY_SET: &str = "/TOPOLOGY SET";
    /// Mesh sizing and distribution parameters.
    pub const MESH_DATA: &str = "/MESH DATA";
    /// Machine-wide geometry parameters, e.g. the blade-set count.
    pub const MACHINE_DATA: &str = "/GEOMETRY/MACHINE DATA";
    /// Inlet opening of the row's flow passage.
    pub const INLET: &str = "/GEOMETRY/INLET";
    /// Outlet opening of the row's flow passage.
    pub const OUTLET: &str = "/GEOMETRY/OUTLET";
}

/// Extra inputs for a geometry read.
#[derive(Debug, Clone, Default)]
pub struct ReadParams {
    /// Paired CAD companion file the engine writes or reads alongside the
    /// geometry description
    pub cad_path: Option<PathBuf>,
}

/// One boundary surface extracted from a row's mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    /// Surface name as reported by the engine
    pub name: String,
    /// Vertex positions
    pub vertices: Vec<[f64; 3]>,
    /// Triangle indices into `vertices`
    pub faces: Vec<[u32; 3]>,
}

/// One live engine instance.
///
/// Implementations manage their own connection state behind `&self`; the
/// orchestrator guarantees that a session is driven by at most one fan-out
/// operation at a time.
#[async_trait]
pub trait EngineSession: Send + Sync {
    /// Read a blade-geometry description file, extracting one row. As a side
    /// effect the engine produces the shared topology-init artifact and the
    /// CAD companion named in `params`. Blocking, may be slow.
    async fn read_geometry(&self, path: &Path, row: &str, params: &ReadParams) -> Result<()>;

    /// Read a pre-processed topology-init artifact for one row.
    async fn read_topology_init(&self, path: &Path, row: &str) -> Result<()>;

    /// Reload a previously saved per-row engine state.
    async fn read_saved_state(&self, path: &Path) -> Result<()>;

    /// Set one or more `key=value` pairs on a configuration object.
    async fn set_parameter(&self, object_path: &str, pairs: &str) -> Result<()>;

    /// Unsuspend a topology object, triggering mesh generation. This is the
    /// dominant cost of the whole system; there is deliberately no timeout.
    async fn unsuspend(&self, object_path: &str) -> Result<()>;

    /// Mesh statistics for a domain ([`ALL_DOMAINS`](crate::stats::ALL_DOMAINS)
    /// for the whole row).
    async fn query_statistics(&self, domain: &str) -> Result<RowStatistics>;

    /// Histogram of one quality measure.
    async fn query_histogram(&self, spec: &HistogramSpec) -> Result<Histogram>;

    /// Read back a single numeric parameter or derived quantity.
    async fn query_scalar(&self, object_path: &str, key: &str) -> Result<f64>;

    /// Extract the row's boundary surfaces. Far more expensive than a
    /// statistics query; callers go through the geometry cache.
    async fn extract_boundary_surfaces(&self) -> Result<Vec<Surface>>;

    /// Write the row's mesh to `path` (engine-side in remote mode).
    async fn save_mesh(&self, path: &Path) -> Result<()>;

    /// Write the row's full engine state to `path` (engine-side in remote
    /// mode).
    async fn save_state(&self, path: &Path) -> Result<()>;

    /// Drain queued engine-side error and warning messages. Never fails;
    /// an unreachable engine simply has nothing to drain.
    async fn drain_error_channel(&self) -> Vec<String>;

    /// Terminate the engine instance.
    async fn quit(&self) -> Result<()>;
}

/// Container plumbing attached to a remote session: lifecycle control plus
/// the staging transport scoped to that container.
pub struct ContainerAttachment {
    /// Stop/remove control for the worker's container
    pub control: ContainerControl,
    /// File staging into and out of the container
    pub staging: ContainerStaging,
}

/// A launched session plus its transport metadata.
pub struct SessionHandle {
    /// The engine connection
    pub session: Box<dyn EngineSession>,
    /// Present when the session executes inside a container
    pub container: Option<ContainerAttachment>,
}

impl SessionHandle {
    /// Handle for a session with no container attachment.
    pub fn local(session: Box<dyn EngineSession>) -> Self {
        Self {
            session,
            container: None,
        }
    }
}

/// Launches engine sessions for one machine.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    /// Launch one engine instance. `log_suffix` distinguishes the instance's
    /// log files; the orchestrator passes the row name (or the case stem for
    /// the machine's own control session).
    async fn launch(&self, options: &MachineOptions, log_suffix: &str) -> Result<SessionHandle>;
}
