//! Per-row worker
//!
//! One worker per blade row: the row's engine session, the container
//! attachment when running remotely, and the injected error sink. A worker
//! has no lifecycle of its own; the machine creates all workers during
//! initialization and tears them all down on shutdown.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::index::NeighborCurves;
use crate::report::ErrorSink;
use crate::session::{
    object_path, ContainerAttachment, EngineSession, ReadParams, SessionHandle, Surface,
};
use crate::stats::{Histogram, HistogramSpec, RowStatistics, ALL_DOMAINS};

/// Extension of the CAD companion file paired with a topology-init artifact.
pub const CAD_COMPANION_EXT: &str = "x_b";

/// Extension of a saved per-row mesh.
pub const MESH_EXT: &str = "def";

/// Extension of a saved per-row engine state.
pub const STATE_EXT: &str = "tst";

/// The orchestrator-side handle coordinating one engine session for one row.
pub struct Worker {
    name: String,
    session: Box<dyn EngineSession>,
    container: Option<ContainerAttachment>,
    sink: ErrorSink,
}

impl Worker {
    /// Wrap a launched session for row `name`.
    pub fn new(name: impl Into<String>, handle: SessionHandle, sink: ErrorSink) -> Self {
        Self {
            name: name.into(),
            session: handle.session,
            container: handle.container,
            sink,
        }
    }

    /// Logical row name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The row's engine session.
    pub fn session(&self) -> &dyn EngineSession {
        self.session.as_ref()
    }

    /// Path the engine sees for a local input file: staged name in remote
    /// mode, the local path otherwise.
    fn engine_path(&self, local: &Path) -> PathBuf {
        match (&self.container, local.file_name()) {
            (Some(attachment), Some(name)) => {
                attachment.staging.remote_path(&name.to_string_lossy())
            }
            _ => local.to_path_buf(),
        }
    }

    /// Initialize the row from the shared topology-init artifact: stage the
    /// artifact and its CAD companion, read it, fully extend both openings,
    /// and trigger mesh generation.
    pub async fn launch_from_topology_init(&self, tginit: &Path) -> Result<()> {
        if let Some(attachment) = &self.container {
            let cad = tginit.with_extension(CAD_COMPANION_EXT);
            attachment.staging.push(&[tginit.to_path_buf(), cad]).await?;
        }
        self.session
            .read_topology_init(&self.engine_path(tginit), &self.name)
            .await?;
        self.sink.drain_session(&self.name, self.session()).await;

        self.session
            .set_parameter(object_path::INLET, "Opening Mode = Fully extend")
            .await?;
        self.session
            .set_parameter(object_path::OUTLET, "Opening Mode = Fully extend")
            .await?;
        self.session.unsuspend(object_path::TOPOLOGY_SET).await?;
        self.sink.drain_session(&self.name, self.session()).await;
        Ok(())
    }

    /// Initialize the row from its own geometry description file, wiring the
    /// openings per the machine's interface method: linked to a neighbor's
    /// curve file, or fully extended.
    pub async fn launch_from_geometry_file(
        &self,
        geometry: &Path,
        neighbors: &NeighborCurves,
    ) -> Result<()> {
        if let Some(attachment) = &self.container {
            attachment.staging.push_with_index(geometry).await?;
            let curves: Vec<PathBuf> = [&neighbors.0, &neighbors.1]
                .into_iter()
                .flatten()
                .cloned()
                .collect();
            attachment.staging.push(&curves).await?;
        }
        self.session
            .read_geometry(&self.engine_path(geometry), &self.name, &ReadParams::default())
            .await?;
        self.sink.drain_session(&self.name, self.session()).await;

        self.configure_opening(object_path::INLET, "Inlet Domain", neighbors.0.as_deref())
            .await?;
        self.configure_opening(object_path::OUTLET, "Outlet Domain", neighbors.1.as_deref())
            .await?;
        self.session.unsuspend(object_path::TOPOLOGY_SET).await?;
        self.sink.drain_session(&self.name, self.session()).await;
        Ok(())
    }

    async fn configure_opening(
        &self,
        opening: &str,
        domain_key: &str,
        neighbor_curve: Option<&Path>,
    ) -> Result<()> {
        match neighbor_curve {
            Some(curve) => {
                self.session
                    .set_parameter(
                        opening,
                        &format!(
                            "Opening Mode = Adjacent blade, Input Filename = {}",
                            self.engine_path(curve).display()
                        ),
                    )
                    .await?;
                // the linked side has no free domain of its own
                self.session
                    .set_parameter(object_path::MESH_DATA, &format!("{domain_key} = Off"))
                    .await?;
            }
            None => {
                self.session
                    .set_parameter(opening, "Opening Mode = Fully extend")
                    .await?;
            }
        }
        Ok(())
    }

    /// Reload the row from a previously persisted engine state.
    pub async fn launch_from_saved_state(&self, artifact: &Path) -> Result<()> {
        if let Some(attachment) = &self.container {
            attachment.staging.push(&[artifact.to_path_buf()]).await?;
        }
        self.session
            .read_saved_state(&self.engine_path(artifact))
            .await?;
        self.sink.drain_session(&self.name, self.session()).await;
        Ok(())
    }

    /// Apply ordered `(object path, key=value pairs)` settings.
    pub async fn apply_settings(&self, settings: &[(String, String)]) -> Result<()> {
        for (object, pairs) in settings {
            self.session.set_parameter(object, pairs).await?;
        }
        Ok(())
    }

    /// Push the row's effective sizing factor.
    pub async fn apply_size_factor(&self, factor: f64) -> Result<()> {
        self.session
            .set_parameter(
                object_path::MESH_DATA,
                &format!("Global Size Factor = {factor}"),
            )
            .await
    }

    /// Switch the row to absolute element-count sizing.
    pub async fn apply_target_elements(&self, target: u64) -> Result<()> {
        self.session
            .set_parameter(
                object_path::MESH_DATA,
                &format!(
                    "Mesh Size Specification Mode = Target Total Element Count, \
                     Target Mesh Granularity = Specify, \
                     Target Mesh Element Count = {target}"
                ),
            )
            .await
    }

    /// Whole-row statistics.
    pub async fn statistics(&self) -> Result<RowStatistics> {
        self.session.query_statistics(ALL_DOMAINS).await
    }

    /// Element count, zero when the row is not yet meshed or errored. The
    /// failure is recorded, not propagated, so sibling rows stay usable.
    pub async fn element_count(&self) -> u64 {
        match self.session.query_statistics(ALL_DOMAINS).await {
            Ok(stats) => stats
                .get(crate::stats::MEASURE_ELEMENTS)
                .and_then(|m| m.count)
                .unwrap_or(0),
            Err(e) => {
                self.sink
                    .record(&self.name, format!("Element count unavailable: {e}"));
                0
            }
        }
    }

    /// Histogram of one quality measure.
    pub async fn histogram(&self, spec: &HistogramSpec) -> Result<Histogram> {
        self.session.query_histogram(spec).await
    }

    /// The row's boundary surfaces.
    pub async fn boundary_surfaces(&self) -> Result<Vec<Surface>> {
        self.session.extract_boundary_surfaces().await
    }

    /// Save the row's mesh as `<prefix><row>.def` in `dir`, pulling it out
    /// of the container in remote mode.
    pub async fn save_mesh_artifact(&self, dir: &Path, prefix: &str) -> Result<PathBuf> {
        let file_name = format!("{prefix}{}.{MESH_EXT}", self.name);
        self.save_artifact(dir, &file_name, false).await
    }

    /// Persist the row's full engine state as `<row>.tst` in `dir`.
    pub async fn save_state_artifact(&self, dir: &Path) -> Result<PathBuf> {
        let file_name = format!("{}.{STATE_EXT}", self.name);
        self.save_artifact(dir, &file_name, true).await
    }

    async fn save_artifact(&self, dir: &Path, file_name: &str, state: bool) -> Result<PathBuf> {
        let local = dir.join(file_name);
        let target = self.engine_path(&local);
        if state {
            self.session.save_state(&target).await?;
        } else {
            self.session.save_mesh(&target).await?;
        }
        if let Some(attachment) = &self.container {
            attachment.staging.pull(&[file_name.to_string()], dir).await?;
        }
        Ok(local)
    }

    /// Terminate the row's session and tear down its container. Failures are
    /// recorded, never raised; shutdown must always complete.
    pub async fn quit(&self) {
        if let Err(e) = self.session.quit().await {
            self.sink.record(&self.name, format!("Quit failed: {e}"));
        }
        if let Some(attachment) = &self.container {
            attachment.control.teardown().await;
        }
    }
}
