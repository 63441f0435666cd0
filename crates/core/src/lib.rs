//! Meshrow orchestration core
//!
//! Drives one meshing-engine session per blade row of a turbomachine and
//! keeps the whole set consistent: parallel initialization from a geometry
//! file, topology-init artifact, machine manifest, or saved state; a
//! machine-wide sizing policy pushed to every row; aggregated statistics,
//! histograms, and boundary-surface extraction; and save/restore of the
//! machine.
//!
//! The engine itself is reached only through the [`EngineSession`] trait and
//! launched through a caller-supplied [`SessionLauncher`], so deployments
//! decide whether rows run against a local install or inside containers.
//!
//! ```no_run
//! use std::sync::Arc;
//! use meshrow_core::{Machine, MachineOptions, SizingStrategy};
//! # async fn run(launcher: Arc<dyn meshrow_core::SessionLauncher>) -> meshrow_core::Result<()> {
//! let mut machine = Machine::new(MachineOptions::new("/cases/fan"), launcher);
//! machine.init_from_geometry(std::path::Path::new("/cases/fan/fan.ndf")).await?;
//! machine.set_sizing_strategy(SizingStrategy::MinFaceArea).await?;
//! let counts = machine.element_counts().await?;
//! println!("{counts:?}");
//! machine.quit().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod geometry;
pub mod index;
pub mod machine;
pub mod report;
pub mod session;
pub mod sizing;
pub mod staging;
pub mod state;
pub mod stats;
pub mod worker;

pub use config::{EngineLogLevel, ExecutionMode, MachineOptions};
pub use error::{Error, Result};
pub use index::{GeometryIndex, InterfaceMethod, MachineManifest, NeighborCurves};
pub use machine::{InitSource, Machine};
pub use report::ErrorSink;
pub use session::{
    object_path, ContainerAttachment, EngineSession, ReadParams, SessionHandle, SessionLauncher,
    Surface,
};
pub use sizing::{SizingState, SizingStrategy};
pub use state::SavedState;
pub use stats::{
    Histogram, HistogramSpec, MeasureStats, RowStatistics, StatisticsSnapshot, ALL_DOMAINS,
    MEASURE_ELEMENTS, MEASURE_VERTICES,
};
pub use worker::Worker;
