//! The multi-row machine orchestrator
//!
//! A [`Machine`] owns one worker per blade row plus, for geometry-initialized
//! machines, a control session used for the file-format conversion. It is
//! initialized exactly once from one of four sources, drives all rows through
//! bounded parallel fan-outs, and shuts everything down on [`Machine::quit`].
//!
//! Failure policy: an operation fails the machine only when its input is
//! unusable (non-unique row names, unreadable manifest, conversion failure).
//! Anything that breaks a single row is recorded in the [`ErrorSink`] instead,
//! and the affected row's result is absent or zero while its siblings keep
//! working.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::MachineOptions;
use crate::dispatch::{bounded_map, fanout_cap, launch_cap};
use crate::error::{Error, Result};
use crate::geometry::GeometryCache;
use crate::index::{self, MachineManifest, NeighborCurves};
use crate::report::ErrorSink;
use crate::session::{object_path, ReadParams, SessionHandle, SessionLauncher, Surface};
use crate::sizing::{
    min_face_area_factors, validate_target_elements, SizingState, SizingStrategy,
};
use crate::state::SavedState;
use crate::stats::{Histogram, HistogramSpec, StatisticsSnapshot};
use crate::worker::{Worker, CAD_COMPANION_EXT};

/// What a machine was initialized from. Decides which later operations are
/// supported; saving machine state, for one, needs a topology-init source.
#[derive(Debug, Clone, PartialEq)]
pub enum InitSource {
    /// A blade-geometry description file covering all rows
    Geometry(PathBuf),
    /// A pre-processed topology-init artifact shared by all rows
    TopologyInit(PathBuf),
    /// A machine manifest listing per-row geometry files
    Manifest(PathBuf),
    /// A record written by [`Machine::save`]
    SavedState(PathBuf),
}

impl InitSource {
    fn describe(&self) -> &'static str {
        match self {
            InitSource::Geometry(_) => "a blade-geometry description file",
            InitSource::TopologyInit(_) => "a topology-init artifact",
            InitSource::Manifest(_) => "a machine manifest",
            InitSource::SavedState(_) => "a saved state record",
        }
    }
}

impl std::fmt::Display for InitSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

fn ensure_unique(rows: &[String]) -> Result<()> {
    let unique: BTreeSet<&String> = rows.iter().collect();
    if unique.len() != rows.len() {
        return Err(Error::RowNamesNotUnique(rows.to_vec()));
    }
    Ok(())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn row_name_of(entry: &str) -> String {
    Path::new(entry)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| entry.to_string())
}

/// One multi-blade-row machine: a set of per-row engine sessions driven in
/// lockstep.
pub struct Machine {
    options: MachineOptions,
    launcher: Arc<dyn SessionLauncher>,
    control: Option<SessionHandle>,
    workers: BTreeMap<String, Worker>,
    row_names: Vec<String>,
    source: Option<InitSource>,
    sizing: SizingState,
    applied: Option<SizingState>,
    cache: GeometryCache,
    sink: ErrorSink,
}

impl Machine {
    /// An uninitialized machine. Nothing is launched until one of the
    /// `init_from_*` entry points runs.
    pub fn new(options: MachineOptions, launcher: Arc<dyn SessionLauncher>) -> Self {
        Self {
            options,
            launcher,
            control: None,
            workers: BTreeMap::new(),
            row_names: Vec::new(),
            source: None,
            sizing: SizingState::for_rows(std::iter::empty()),
            applied: None,
            cache: GeometryCache::new(),
            sink: ErrorSink::new(),
        }
    }

    /// Row names in machine order.
    pub fn row_names(&self) -> &[String] {
        &self.row_names
    }

    /// Whether an `init_from_*` entry point has completed.
    pub fn is_initialized(&self) -> bool {
        self.source.is_some()
    }

    /// The source this machine was initialized from.
    pub fn source(&self) -> Option<&InitSource> {
        self.source.as_ref()
    }

    /// The machine's current sizing intent.
    pub fn sizing(&self) -> &SizingState {
        &self.sizing
    }

    /// Everything recorded per row since initialization, in row order.
    pub fn errors(&self) -> BTreeMap<String, Vec<String>> {
        self.sink.report()
    }

    // ---- initialization -------------------------------------------------

    /// Initialize from a blade-geometry description file covering the whole
    /// machine.
    ///
    /// A control session converts the file into the shared topology-init
    /// artifact first, then one worker per discovered row loads that
    /// artifact. The conversion-then-first-read launch runs under
    /// [`launch_cap`], so it is strictly serial on Windows.
    pub async fn init_from_geometry(&mut self, geometry: &Path) -> Result<Vec<String>> {
        self.ensure_uninitialized()?;
        let rows = index::scan_blade_rows(geometry)?;
        ensure_unique(&rows)?;

        let stem = row_name_of(&file_name_of(geometry));
        tracing::info!(case = %stem, rows = rows.len(), "Initializing machine from blade geometry");

        let control = self.launcher.launch(&self.options, &stem).await?;
        if let Some(attachment) = &control.container {
            attachment.staging.push_with_index(geometry).await?;
        }
        let engine_geometry = match &control.container {
            Some(attachment) => attachment.staging.remote_path(&file_name_of(geometry)),
            None => geometry.to_path_buf(),
        };
        let tginit_name = format!("{stem}.tginit");
        let cad_name = format!("{stem}.{CAD_COMPANION_EXT}");
        let engine_dir = engine_geometry
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.options.working_dir.clone());

        // the conversion read writes the shared artifact and its CAD
        // companion next to the geometry file
        let params = ReadParams {
            cad_path: Some(engine_dir.join(&cad_name)),
        };
        control
            .session
            .read_geometry(&engine_geometry, &rows[0], &params)
            .await?;
        self.sink.drain_session(&stem, control.session.as_ref()).await;
        if let Some(attachment) = &control.container {
            attachment
                .staging
                .pull(&[tginit_name.clone(), cad_name], &self.options.working_dir)
                .await?;
        }
        self.control = Some(control);

        let tginit = self.options.working_dir.join(&tginit_name);
        self.install_rows(rows.clone(), InitSource::Geometry(geometry.to_path_buf()));
        let cap = launch_cap(rows.len());
        self.launch_rows(&rows, cap).await;
        let results = bounded_map(self.workers.iter(), cap, |_, worker| {
            let tginit = tginit.clone();
            async move { worker.launch_from_topology_init(&tginit).await }
        })
        .await;
        self.record_row_failures("Row initialization failed", results);
        Ok(rows)
    }

    /// Initialize from an existing topology-init artifact. The artifact does
    /// not name its rows, so the caller supplies them.
    pub async fn init_from_topology_init(
        &mut self,
        tginit: &Path,
        rows: &[String],
    ) -> Result<Vec<String>> {
        self.ensure_uninitialized()?;
        if rows.is_empty() {
            return Err(Error::Other(
                "At least one row name is required to load a topology-init artifact".into(),
            ));
        }
        let rows = rows.to_vec();
        ensure_unique(&rows)?;
        tracing::info!(artifact = %tginit.display(), rows = rows.len(), "Initializing machine from topology-init artifact");

        self.install_rows(rows.clone(), InitSource::TopologyInit(tginit.to_path_buf()));
        let cap = fanout_cap(rows.len());
        self.launch_rows(&rows, cap).await;
        let results = bounded_map(self.workers.iter(), cap, |_, worker| {
            let tginit = tginit.to_path_buf();
            async move { worker.launch_from_topology_init(&tginit).await }
        })
        .await;
        self.record_row_failures("Row initialization failed", results);
        Ok(rows)
    }

    /// Initialize from a machine manifest: every row loads its own geometry
    /// file, with neighboring rows linked per the manifest's interface
    /// method.
    pub async fn init_from_manifest(&mut self, manifest_path: &Path) -> Result<Vec<String>> {
        self.ensure_uninitialized()?;
        let manifest = MachineManifest::load(manifest_path)?;
        let base_dir = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let curves_by_entry = manifest.neighbor_curves(&base_dir);

        let mut rows = Vec::with_capacity(manifest.rows.len());
        let mut plan: BTreeMap<String, (PathBuf, NeighborCurves)> = BTreeMap::new();
        for entry in &manifest.rows {
            let name = row_name_of(entry);
            let curves = curves_by_entry.get(entry).cloned().unwrap_or((None, None));
            plan.insert(name.clone(), (base_dir.join(entry), curves));
            rows.push(name);
        }
        ensure_unique(&rows)?;
        tracing::info!(manifest = %manifest_path.display(), rows = rows.len(), "Initializing machine from manifest");

        self.install_rows(rows.clone(), InitSource::Manifest(manifest_path.to_path_buf()));
        let cap = fanout_cap(rows.len());
        self.launch_rows(&rows, cap).await;
        let results = bounded_map(self.workers.iter(), cap, |name, worker| {
            let job = plan.get(&name).cloned();
            async move {
                match job {
                    Some((geometry, curves)) => {
                        worker.launch_from_geometry_file(&geometry, &curves).await
                    }
                    None => Ok(()),
                }
            }
        })
        .await;
        self.record_row_failures("Row initialization failed", results);
        Ok(rows)
    }

    /// Rebuild a machine from a record written by [`Machine::save`]. Each
    /// row reloads its persisted engine state, then the recorded sizing is
    /// re-asserted on the fresh sessions.
    pub async fn init_from_saved_state(&mut self, record_path: &Path) -> Result<Vec<String>> {
        self.ensure_uninitialized()?;
        let record = SavedState::load(record_path)?;
        ensure_unique(&record.rows)?;
        let rows = record.rows.clone();
        tracing::info!(record = %record_path.display(), rows = rows.len(), "Restoring machine from saved state");

        self.install_rows(rows.clone(), InitSource::SavedState(record_path.to_path_buf()));
        let cap = fanout_cap(rows.len());
        self.launch_rows(&rows, cap).await;
        let artifacts = record.state_artifacts.clone();
        let results = bounded_map(self.workers.iter(), cap, |name, worker| {
            let artifact = artifacts.get(&name).cloned();
            async move {
                match artifact {
                    Some(path) => worker.launch_from_saved_state(&path).await,
                    None => Err(Error::Other(
                        "Saved record has no state artifact for this row".into(),
                    )),
                }
            }
        })
        .await;
        self.record_row_failures("State restore failed", results);

        self.apply_sizing_state(record.sizing).await?;
        Ok(rows)
    }

    // ---- sizing ---------------------------------------------------------

    /// Apply a machine-wide sizing strategy.
    ///
    /// `MinFaceArea` queries every row's average base-topology face area and
    /// scales each row toward the smallest one. Applying the strategy that
    /// is already in effect is a no-op; re-deriving factors from the areas a
    /// previous application already changed would oscillate instead of
    /// converging.
    pub async fn set_sizing_strategy(&mut self, strategy: SizingStrategy) -> Result<()> {
        self.ensure_initialized()?;
        if strategy == SizingStrategy::MinFaceArea
            && self.applied.as_ref().map(|a| a.strategy) == Some(strategy)
        {
            tracing::debug!(%strategy, "Sizing strategy already in effect");
            return Ok(());
        }
        let base_factors = match strategy {
            SizingStrategy::None => self.row_names.iter().map(|r| (r.clone(), 1.0)).collect(),
            SizingStrategy::MinFaceArea => {
                let areas = self.average_base_face_areas().await?;
                min_face_area_factors(&areas)?
            }
        };
        let mut candidate = self.sizing.clone();
        candidate.strategy = strategy;
        candidate.base_factors = base_factors;
        self.apply_sizing_state(candidate).await
    }

    /// Override base factors for the named rows. Unnamed rows keep their
    /// current base factor; the sizing strategy is cleared since the factors
    /// no longer come from it.
    pub async fn set_base_factors(&mut self, factors: &BTreeMap<String, f64>) -> Result<()> {
        self.ensure_initialized()?;
        self.sizing.validate_factors(factors)?;
        let mut candidate = self.sizing.clone();
        candidate.strategy = SizingStrategy::None;
        for (row, value) in factors {
            candidate.base_factors.insert(row.clone(), *value);
        }
        self.apply_sizing_state(candidate).await
    }

    /// Set the machine-wide multiplier applied on top of every base factor.
    pub async fn set_global_size_factor(&mut self, factor: f64) -> Result<()> {
        self.ensure_initialized()?;
        if !factor.is_finite() || factor <= 0.0 {
            return Err(Error::InvalidFactor {
                row: "<machine>".into(),
                value: factor,
            });
        }
        let mut candidate = self.sizing.clone();
        candidate.global_factor = factor;
        self.apply_sizing_state(candidate).await
    }

    /// Switch the machine to an absolute element target, distributed across
    /// rows by the engine.
    pub async fn set_target_element_count(&mut self, target: u64) -> Result<()> {
        self.ensure_initialized()?;
        validate_target_elements(target)?;
        let mut candidate = self.sizing.clone();
        candidate.target_elements = Some(target);
        self.apply_sizing_state(candidate).await
    }

    /// Push `candidate` to the workers, skipping every part that matches
    /// what was last applied. Equal candidates cost no engine traffic at
    /// all.
    async fn apply_sizing_state(&mut self, candidate: SizingState) -> Result<()> {
        if self.applied.as_ref() == Some(&candidate) {
            tracing::debug!("Sizing unchanged since last application; skipping fan-out");
            self.sizing = candidate;
            return Ok(());
        }
        let push_factors = self.applied.as_ref().map_or(true, |a| {
            a.base_factors != candidate.base_factors || a.global_factor != candidate.global_factor
        });
        let push_target = candidate.target_elements.is_some()
            && self
                .applied
                .as_ref()
                .map_or(true, |a| a.target_elements != candidate.target_elements);
        let cap = fanout_cap(self.workers.len());

        if push_factors {
            let results = bounded_map(self.workers.iter(), cap, |name, worker| {
                let factor = candidate.effective_factor(&name);
                async move { worker.apply_size_factor(factor).await }
            })
            .await;
            self.record_row_failures("Sizing push failed", results);
        }
        if push_target {
            if let Some(target) = candidate.target_elements {
                let results = bounded_map(self.workers.iter(), cap, |_, worker| async move {
                    worker.apply_target_elements(target).await
                })
                .await;
                self.record_row_failures("Element target push failed", results);
            }
        }

        self.sizing = candidate.clone();
        self.applied = Some(candidate);
        Ok(())
    }

    // ---- queries --------------------------------------------------------

    /// Average base-topology face area per row, the input to the
    /// `MinFaceArea` strategy. Rows whose query failed are absent.
    pub async fn average_base_face_areas(&self) -> Result<BTreeMap<String, f64>> {
        self.ensure_initialized()?;
        let cap = fanout_cap(self.workers.len());
        let results = bounded_map(self.workers.iter(), cap, |_, worker| async move {
            worker
                .session()
                .query_scalar(object_path::MESH_DATA, "Average Base Face Area")
                .await
        })
        .await;
        Ok(self.record_row_failures("Face area query failed", results))
    }

    /// Average background face area per row. Coarser than the base areas;
    /// used to judge how far the background mesh is from the target.
    pub async fn average_background_face_areas(&self) -> Result<BTreeMap<String, f64>> {
        self.ensure_initialized()?;
        let cap = fanout_cap(self.workers.len());
        let results = bounded_map(self.workers.iter(), cap, |_, worker| async move {
            worker
                .session()
                .query_scalar(object_path::MESH_DATA, "Average Background Face Area")
                .await
        })
        .await;
        Ok(self.record_row_failures("Background face area query failed", results))
    }

    /// Spanwise element count per row as the engines report it back.
    pub async fn spanwise_element_counts(&self) -> Result<BTreeMap<String, u32>> {
        self.ensure_initialized()?;
        let cap = fanout_cap(self.workers.len());
        let results = bounded_map(self.workers.iter(), cap, |_, worker| async move {
            let count = worker
                .session()
                .query_scalar(object_path::MESH_DATA, "Number Of Elements")
                .await?;
            Ok(count.round() as u32)
        })
        .await;
        Ok(self.record_row_failures("Spanwise count query failed", results))
    }

    /// Effective size factor per row as the engines report it back.
    pub async fn local_size_factors(&self) -> Result<BTreeMap<String, f64>> {
        self.ensure_initialized()?;
        let cap = fanout_cap(self.workers.len());
        let results = bounded_map(self.workers.iter(), cap, |_, worker| async move {
            worker
                .session()
                .query_scalar(object_path::MESH_DATA, "Global Size Factor")
                .await
        })
        .await;
        Ok(self.record_row_failures("Size factor query failed", results))
    }

    /// Whole-machine statistics. Rows whose query failed are absent from the
    /// snapshot; the failure is recorded per row.
    pub async fn statistics_snapshot(&self) -> Result<StatisticsSnapshot> {
        self.ensure_initialized()?;
        let cap = fanout_cap(self.workers.len());
        let results = bounded_map(self.workers.iter(), cap, |_, worker| async move {
            worker.statistics().await
        })
        .await;
        Ok(StatisticsSnapshot {
            rows: self.record_row_failures("Statistics query failed", results),
        })
    }

    /// Element count per row. A row that is unmeshed, errored, or was never
    /// launched counts zero.
    pub async fn element_counts(&self) -> Result<BTreeMap<String, u64>> {
        self.ensure_initialized()?;
        let cap = fanout_cap(self.workers.len());
        let results = bounded_map(self.workers.iter(), cap, |_, worker| async move {
            Ok(worker.element_count().await)
        })
        .await;
        let mut counts = self.record_row_failures("Element count failed", results);
        for row in &self.row_names {
            counts.entry(row.clone()).or_insert(0);
        }
        Ok(counts)
    }

    /// Sum of all rows' element counts.
    pub async fn total_element_count(&self) -> Result<u64> {
        Ok(self.element_counts().await?.values().sum())
    }

    /// Histogram of one quality measure per row. Rows whose query failed are
    /// absent.
    pub async fn histograms(&self, spec: &HistogramSpec) -> Result<BTreeMap<String, Histogram>> {
        self.ensure_initialized()?;
        let cap = fanout_cap(self.workers.len());
        let results = bounded_map(self.workers.iter(), cap, |_, worker| async move {
            worker.histogram(spec).await
        })
        .await;
        Ok(self.record_row_failures("Histogram query failed", results))
    }

    /// Boundary surfaces of every row, concatenated in row order.
    ///
    /// Extraction only runs when the machine's statistics changed since the
    /// last call; otherwise the cached result is returned.
    pub async fn boundary_surfaces(&mut self) -> Result<Vec<Surface>> {
        self.ensure_initialized()?;
        let snapshot = self.statistics_snapshot().await?;
        let fingerprint = snapshot.fingerprint()?;
        if let Some(cached) = self.cache.lookup(&fingerprint) {
            tracing::debug!("Statistics unchanged; serving cached boundary surfaces");
            return Ok(cached.to_vec());
        }

        let cap = fanout_cap(self.workers.len());
        let results = bounded_map(self.workers.iter(), cap, |_, worker| async move {
            worker.boundary_surfaces().await
        })
        .await;
        let per_row = self.record_row_failures("Surface extraction failed", results);
        let surfaces: Vec<Surface> = per_row.into_values().flatten().collect();
        self.cache.store(fingerprint, surfaces.clone());
        Ok(surfaces)
    }

    // ---- per-row and machine-wide settings ------------------------------

    /// Set the blade-set count of one row.
    pub async fn set_blade_set_count(&self, row: &str, count: u32) -> Result<()> {
        self.ensure_initialized()?;
        self.worker(row)?
            .session()
            .set_parameter(
                object_path::MACHINE_DATA,
                &format!("Bladeset Count = {count}"),
            )
            .await
    }

    /// Set spanwise element counts for stator and rotor rows.
    ///
    /// With `rotor_rows` given, exactly those rows count as rotors. Without
    /// it the machine is assumed to alternate starting from a stator.
    pub async fn set_spanwise_counts(
        &self,
        stator_count: u32,
        rotor_count: u32,
        rotor_rows: Option<&[String]>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        if let Some(rotors) = rotor_rows {
            for row in rotors {
                self.worker(row)?;
            }
        }
        let counts: BTreeMap<String, u32> = self
            .row_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let is_rotor = match rotor_rows {
                    Some(rotors) => rotors.contains(name),
                    None => i % 2 == 1,
                };
                (name.clone(), if is_rotor { rotor_count } else { stator_count })
            })
            .collect();

        let cap = fanout_cap(self.workers.len());
        let results = bounded_map(self.workers.iter(), cap, |name, worker| {
            let count = counts.get(&name).copied();
            async move {
                match count {
                    Some(count) => {
                        worker
                            .session()
                            .set_parameter(
                                object_path::MESH_DATA,
                                &format!(
                                    "Spanwise Blade Distribution Option = Element Count and Size, \
                                     Number Of Elements = {count}"
                                ),
                            )
                            .await
                    }
                    None => Ok(()),
                }
            }
        })
        .await;
        self.record_row_failures("Spanwise count push failed", results);
        Ok(())
    }

    /// Set the boundary-layer first element offset, machine-wide with
    /// optional per-row overrides.
    pub async fn set_boundary_layer_offsets(
        &self,
        machine_offset: f64,
        overrides: &BTreeMap<String, f64>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        for row in overrides.keys() {
            self.worker(row)?;
        }
        let cap = fanout_cap(self.workers.len());
        let results = bounded_map(self.workers.iter(), cap, |name, worker| {
            let offset = overrides.get(&name).copied().unwrap_or(machine_offset);
            async move {
                worker
                    .session()
                    .set_parameter(
                        object_path::MESH_DATA,
                        &format!(
                            "Boundary Layer Specification Method = First Element Offset, \
                             First Element Offset = {offset}"
                        ),
                    )
                    .await
            }
        })
        .await;
        self.record_row_failures("Boundary layer push failed", results);
        Ok(())
    }

    /// Apply arbitrary per-row `(object path, key=value pairs)` settings.
    /// Every named row must exist; rows not named are untouched.
    pub async fn apply_custom_settings(
        &self,
        settings: &BTreeMap<String, Vec<(String, String)>>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        for row in settings.keys() {
            self.worker(row)?;
        }
        let cap = fanout_cap(self.workers.len());
        let results = bounded_map(self.workers.iter(), cap, |name, worker| {
            let row_settings = settings.get(&name).cloned();
            async move {
                match row_settings {
                    Some(row_settings) => worker.apply_settings(&row_settings).await,
                    None => Ok(()),
                }
            }
        })
        .await;
        self.record_row_failures("Settings push failed", results);
        Ok(())
    }

    // ---- persistence ----------------------------------------------------

    /// Save every row's mesh as `<prefix><row>.def` in the working
    /// directory. Rows whose save failed are absent from the returned map.
    pub async fn save_meshes(&self, prefix: &str) -> Result<BTreeMap<String, PathBuf>> {
        self.ensure_initialized()?;
        let cap = fanout_cap(self.workers.len());
        let dir = self.options.working_dir.clone();
        let results = bounded_map(self.workers.iter(), cap, |_, worker| {
            let dir = dir.clone();
            let prefix = prefix.to_string();
            async move { worker.save_mesh_artifact(&dir, &prefix).await }
        })
        .await;
        Ok(self.record_row_failures("Mesh save failed", results))
    }

    /// Persist the machine: every row's engine state plus a record that
    /// [`Machine::init_from_saved_state`] can rebuild from.
    ///
    /// Only topology-init machines are savable; the other sources have no
    /// single artifact the record could point back to.
    pub async fn save(&self) -> Result<SavedState> {
        let source = self.source.as_ref().ok_or(Error::NotInitialized)?;
        let source_path = match source {
            InitSource::TopologyInit(path) => path.clone(),
            other => {
                return Err(Error::UnsupportedSource {
                    required: "a topology-init artifact",
                    actual: other.describe().to_string(),
                })
            }
        };
        let cap = fanout_cap(self.workers.len());
        let dir = self.options.working_dir.clone();
        let results = bounded_map(self.workers.iter(), cap, |_, worker| {
            let dir = dir.clone();
            async move { worker.save_state_artifact(&dir).await }
        })
        .await;
        let state_artifacts = self.record_row_failures("State save failed", results);
        Ok(SavedState {
            source_path,
            rows: self.row_names.clone(),
            sizing: self.sizing.clone(),
            state_artifacts,
        })
    }

    // ---- shutdown -------------------------------------------------------

    /// Terminate every worker and the control session, tearing down their
    /// containers. Safe to call repeatedly and on a machine that was never
    /// initialized; per-session failures are recorded, never raised.
    pub async fn quit(&mut self) {
        if self.workers.is_empty() && self.control.is_none() {
            return;
        }
        tracing::info!(rows = self.workers.len(), "Shutting down machine");
        let cap = fanout_cap(self.workers.len());
        let _ = bounded_map(self.workers.iter(), cap, |_, worker| async move {
            worker.quit().await;
            Ok(())
        })
        .await;
        self.workers.clear();

        if let Some(control) = self.control.take() {
            if let Err(e) = control.session.quit().await {
                self.sink
                    .record("<machine>", format!("Control session quit failed: {e}"));
            }
            if let Some(attachment) = &control.container {
                attachment.control.teardown().await;
            }
        }
        self.cache.invalidate();
    }

    // ---- internals ------------------------------------------------------

    fn ensure_uninitialized(&self) -> Result<()> {
        match &self.source {
            Some(source) => Err(Error::AlreadyInitialized(source.describe().to_string())),
            None => Ok(()),
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.source.is_some() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    fn worker(&self, row: &str) -> Result<&Worker> {
        self.workers.get(row).ok_or_else(|| Error::UnknownRow {
            name: row.to_string(),
            available: self.row_names.clone(),
        })
    }

    fn install_rows(&mut self, rows: Vec<String>, source: InitSource) {
        self.sizing = SizingState::for_rows(&rows);
        // fresh engines start at factor 1.0, so the defaults count as applied
        self.applied = Some(self.sizing.clone());
        self.row_names = rows;
        self.source = Some(source);
        self.cache.invalidate();
    }

    /// Launch one session per row. A failed launch leaves the row without a
    /// worker and records why; siblings proceed.
    async fn launch_rows(&mut self, rows: &[String], cap: usize) {
        let seeds: BTreeMap<String, ()> = rows.iter().cloned().map(|r| (r, ())).collect();
        let launcher = Arc::clone(&self.launcher);
        let options = self.options.clone();
        let results = bounded_map(seeds.iter(), cap, |name, _| {
            let launcher = Arc::clone(&launcher);
            let options = options.clone();
            async move { launcher.launch(&options, &name).await }
        })
        .await;
        for (name, result) in results {
            match result {
                Ok(handle) => {
                    let worker = Worker::new(name.clone(), handle, self.sink.clone());
                    self.workers.insert(name, worker);
                }
                Err(e) => self
                    .sink
                    .record(&name, format!("Session launch failed: {e}")),
            }
        }
    }

    /// Split fan-out results into successes and recorded per-row failures.
    fn record_row_failures<T>(
        &self,
        context: &str,
        results: BTreeMap<String, Result<T>>,
    ) -> BTreeMap<String, T> {
        let mut ok = BTreeMap::new();
        for (name, result) in results {
            match result {
                Ok(value) => {
                    ok.insert(name, value);
                }
                Err(e) => self.sink.record(&name, format!("{context}: {e}")),
            }
        }
        ok
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        if !self.workers.is_empty() || self.control.is_some() {
            tracing::warn!("Machine dropped without quit(); engine sessions may be left running");
        }
    }
}
