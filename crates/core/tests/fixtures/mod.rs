//! Shared in-process mock engine for integration tests.
//!
//! [`MockWorld`] is the scripted universe behind every session one test
//! launches: per-row face areas, launch failures, and call counters. Each
//! launched [`MockSession`] keeps its own state (size factor, applied
//! parameters, meshed flag) so tests can assert exactly what reached each
//! row's engine.

// not every test binary exercises every scripted knob
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use async_trait::async_trait;
use parking_lot::Mutex;

use meshrow_core::{
    EngineSession, Error, Histogram, HistogramSpec, MachineOptions, MeasureStats, ReadParams,
    Result, RowStatistics, SessionHandle, SessionLauncher, Surface, MEASURE_ELEMENTS,
    MEASURE_VERTICES,
};

/// Elements a freshly meshed mock row reports at size factor 1.0.
pub const BASE_ELEMENTS: f64 = 100_000.0;

static TRACING: Once = Once::new();

/// Route orchestrator logs through the test harness, honoring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Scripted engine universe shared by a launcher and all its sessions.
#[derive(Default)]
pub struct MockWorld {
    /// Average base face area per row at size factor 1.0
    pub face_areas: Mutex<BTreeMap<String, f64>>,
    /// Log suffixes whose launch is scripted to fail
    pub fail_launch: Mutex<Vec<String>>,
    /// Row names whose statistics queries are scripted to fail
    pub fail_statistics: Mutex<Vec<String>>,
    /// Total sessions launched, control session included
    pub launches: AtomicUsize,
    /// Total boundary-surface extractions across all sessions
    pub extract_calls: AtomicUsize,
    /// Live session states keyed by log suffix
    pub sessions: Mutex<BTreeMap<String, Arc<SessionState>>>,
}

impl MockWorld {
    pub fn with_face_areas(areas: &[(&str, f64)]) -> Arc<Self> {
        init_tracing();
        let world = Self::default();
        *world.face_areas.lock() = areas
            .iter()
            .map(|(row, area)| (row.to_string(), *area))
            .collect();
        Arc::new(world)
    }

    /// State of the session launched under `name`. Panics when no such
    /// session was launched; tests only ask for rows they scripted.
    pub fn session(&self, name: &str) -> Arc<SessionState> {
        Arc::clone(
            self.sessions
                .lock()
                .get(name)
                .unwrap_or_else(|| panic!("no session launched for '{name}'")),
        )
    }
}

/// State of one launched mock session.
pub struct SessionState {
    pub meshed: Mutex<bool>,
    pub size_factor: Mutex<f64>,
    pub spanwise_count: Mutex<f64>,
    /// Every `(object path, pairs)` applied, in order
    pub parameters: Mutex<Vec<(String, String)>>,
    /// Every path handed to a read call
    pub reads: Mutex<Vec<PathBuf>>,
    /// Paths the session was asked to persist state or meshes to
    pub saves: Mutex<Vec<PathBuf>>,
    /// Messages waiting in the engine's error channel
    pub pending_errors: Mutex<Vec<String>>,
    pub quit_calls: AtomicUsize,
}

impl SessionState {
    fn new() -> Self {
        Self {
            meshed: Mutex::new(false),
            size_factor: Mutex::new(1.0),
            spanwise_count: Mutex::new(20.0),
            parameters: Mutex::new(Vec::new()),
            reads: Mutex::new(Vec::new()),
            saves: Mutex::new(Vec::new()),
            pending_errors: Mutex::new(Vec::new()),
            quit_calls: AtomicUsize::new(0),
        }
    }

    /// How many applied parameter strings contain `needle`.
    pub fn parameter_calls(&self, needle: &str) -> usize {
        self.parameters
            .lock()
            .iter()
            .filter(|(_, pairs)| pairs.contains(needle))
            .count()
    }
}

fn parse_value(pairs: &str, key: &str) -> Option<f64> {
    pairs.split(',').find_map(|part| {
        let (k, v) = part.split_once('=')?;
        if k.trim() == key {
            v.trim().parse().ok()
        } else {
            None
        }
    })
}

/// One scripted engine session.
pub struct MockSession {
    name: String,
    world: Arc<MockWorld>,
    state: Arc<SessionState>,
}

#[async_trait]
impl EngineSession for MockSession {
    async fn read_geometry(&self, path: &std::path::Path, _row: &str, _params: &ReadParams) -> Result<()> {
        self.state.reads.lock().push(path.to_path_buf());
        Ok(())
    }

    async fn read_topology_init(&self, path: &std::path::Path, _row: &str) -> Result<()> {
        self.state.reads.lock().push(path.to_path_buf());
        Ok(())
    }

    async fn read_saved_state(&self, path: &std::path::Path) -> Result<()> {
        self.state.reads.lock().push(path.to_path_buf());
        // a restored row comes back meshed
        *self.state.meshed.lock() = true;
        Ok(())
    }

    async fn set_parameter(&self, object_path: &str, pairs: &str) -> Result<()> {
        if let Some(factor) = parse_value(pairs, "Global Size Factor") {
            *self.state.size_factor.lock() = factor;
        }
        if let Some(count) = parse_value(pairs, "Number Of Elements") {
            *self.state.spanwise_count.lock() = count;
        }
        self.state
            .parameters
            .lock()
            .push((object_path.to_string(), pairs.to_string()));
        Ok(())
    }

    async fn unsuspend(&self, _object_path: &str) -> Result<()> {
        *self.state.meshed.lock() = true;
        Ok(())
    }

    async fn query_statistics(&self, _domain: &str) -> Result<RowStatistics> {
        if self.world.fail_statistics.lock().iter().any(|r| r == &self.name) {
            return Err(Error::Engine(format!("statistics unavailable for {}", self.name)));
        }
        if !*self.state.meshed.lock() {
            return Ok(RowStatistics::new());
        }
        let factor = *self.state.size_factor.lock();
        let elements = (BASE_ELEMENTS / (factor * factor)).round() as u64;
        let mut stats = RowStatistics::new();
        stats.insert(MEASURE_ELEMENTS.into(), MeasureStats::count(elements));
        stats.insert(MEASURE_VERTICES.into(), MeasureStats::count(elements + 1));
        stats.insert(
            "Minimum Face Angle".into(),
            MeasureStats {
                minimum: Some(22.5),
                maximum: Some(89.9),
                percent_bad: Some(0.4),
                percent_ok: Some(99.6),
                count: Some(elements),
                units: Some("deg".into()),
            },
        );
        Ok(stats)
    }

    async fn query_histogram(&self, spec: &HistogramSpec) -> Result<Histogram> {
        Ok(Histogram {
            variable: spec.variable.clone(),
            bin_edges: spec.bins.clone().unwrap_or_else(|| vec![0.0, 45.0, 90.0]),
            counts: vec![12, 88],
            units: spec.units.clone().or_else(|| Some("deg".into())),
        })
    }

    async fn query_scalar(&self, _object_path: &str, key: &str) -> Result<f64> {
        let factor = *self.state.size_factor.lock();
        match key {
            "Global Size Factor" => Ok(factor),
            "Number Of Elements" => Ok(*self.state.spanwise_count.lock()),
            "Average Background Face Area" => {
                let base = self
                    .world
                    .face_areas
                    .lock()
                    .get(&self.name)
                    .copied()
                    .ok_or_else(|| Error::Engine(format!("no face area scripted for {}", self.name)))?;
                // background faces sit several refinement levels above base
                Ok(base * 9.0 / (factor * factor))
            }
            "Average Base Face Area" => {
                let base = self
                    .world
                    .face_areas
                    .lock()
                    .get(&self.name)
                    .copied()
                    .ok_or_else(|| Error::Engine(format!("no face area scripted for {}", self.name)))?;
                // finer rows have proportionally smaller faces
                Ok(base / (factor * factor))
            }
            other => Err(Error::Engine(format!("unknown scalar '{other}'"))),
        }
    }

    async fn extract_boundary_surfaces(&self) -> Result<Vec<Surface>> {
        self.world.extract_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Surface {
            name: format!("{}/hub", self.name),
            vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            faces: vec![[0, 1, 2]],
        }])
    }

    async fn save_mesh(&self, path: &std::path::Path) -> Result<()> {
        std::fs::write(path, b"mock mesh")?;
        self.state.saves.lock().push(path.to_path_buf());
        Ok(())
    }

    async fn save_state(&self, path: &std::path::Path) -> Result<()> {
        std::fs::write(path, b"mock state")?;
        self.state.saves.lock().push(path.to_path_buf());
        Ok(())
    }

    async fn drain_error_channel(&self) -> Vec<String> {
        std::mem::take(&mut *self.state.pending_errors.lock())
    }

    async fn quit(&self) -> Result<()> {
        self.state.quit_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Launcher scripted by a [`MockWorld`].
pub struct MockLauncher {
    world: Arc<MockWorld>,
}

impl MockLauncher {
    pub fn new(world: &Arc<MockWorld>) -> Arc<Self> {
        Arc::new(Self {
            world: Arc::clone(world),
        })
    }
}

#[async_trait]
impl SessionLauncher for MockLauncher {
    async fn launch(&self, _options: &MachineOptions, log_suffix: &str) -> Result<SessionHandle> {
        self.world.launches.fetch_add(1, Ordering::SeqCst);
        if self.world.fail_launch.lock().iter().any(|r| r == log_suffix) {
            return Err(Error::Engine(format!("no license seat for {log_suffix}")));
        }
        let state = Arc::new(SessionState::new());
        self.world
            .sessions
            .lock()
            .insert(log_suffix.to_string(), Arc::clone(&state));
        Ok(SessionHandle::local(Box::new(MockSession {
            name: log_suffix.to_string(),
            world: Arc::clone(&self.world),
            state,
        })))
    }
}

/// Write a machine manifest plus empty per-row geometry files into `dir`.
pub fn write_manifest(dir: &std::path::Path, rows: &[&str], method: &str) -> PathBuf {
    let files: Vec<String> = rows.iter().map(|r| format!("{r}.inf")).collect();
    let manifest = serde_json::json!({
        "Number of Blade Rows": rows.len(),
        "Interface Method": method,
        "Blade Rows": files,
    });
    for file in &files {
        std::fs::write(dir.join(file), b"! mock geometry index\n").unwrap();
    }
    let path = dir.join("machine.tgmachine");
    std::fs::write(&path, serde_json::to_string_pretty(&manifest).unwrap()).unwrap();
    path
}
