//! Error types for the meshrow orchestration core

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for meshrow core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while orchestrating a machine.
///
/// Fatal initialization errors (non-unique row names, unsupported source for
/// an operation, bad sizing input) surface to the direct caller. Per-row
/// operational failures are not represented here; they are recorded in the
/// [`ErrorSink`](crate::report::ErrorSink) and the affected row's result is
/// reported as absent or zero.
#[derive(Debug, Error)]
pub enum Error {
    /// Row names from an initialization source are not unique
    #[error("Row names are not unique: {0:?}")]
    RowNamesNotUnique(Vec<String>),

    /// Operation requires an initialized machine
    #[error("Machine is not initialized")]
    NotInitialized,

    /// Machine was already initialized via another entry point
    #[error("Machine is already initialized from {0}")]
    AlreadyInitialized(String),

    /// A row name was given that the machine does not know
    #[error("No row named '{name}'. Available rows: {available:?}")]
    UnknownRow {
        /// The unknown row name
        name: String,
        /// Row names the machine was initialized with
        available: Vec<String>,
    },

    /// Operation is not supported for the machine's initialization source
    #[error("Operation requires a machine initialized from {required}, but this machine was initialized from {actual}")]
    UnsupportedSource {
        /// Source style the operation needs
        required: &'static str,
        /// Source style the machine actually has
        actual: String,
    },

    /// Requested target element count is below the practical engine minimum
    #[error("Target element count {requested} is below the practical minimum of {minimum}")]
    TargetTooSmall {
        /// Count the caller asked for
        requested: u64,
        /// Smallest count the engine meshes reliably
        minimum: u64,
    },

    /// A sizing factor was not a positive finite number
    #[error("Sizing factor {value} for row '{row}' is not a positive finite number")]
    InvalidFactor {
        /// Row the factor was given for
        row: String,
        /// The offending value
        value: f64,
    },

    /// Remote engine reported a failure
    #[error("Engine error: {0}")]
    Engine(String),

    /// File staging to or from the remote environment failed
    #[error("Staging error: {0}")]
    Staging(String),

    /// A staged output file never appeared within the retry budget
    #[error("File {path} did not appear after {attempts} transfer attempts")]
    StagedFileMissing {
        /// Remote path that was polled
        path: PathBuf,
        /// Attempts made before giving up
        attempts: usize,
    },

    /// Machine manifest parsing or validation error
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Geometry-description index parsing error
    #[error("Geometry index error: {0}")]
    GeometryIndex(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
