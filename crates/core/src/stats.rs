//! Typed mesh-statistics model and the snapshot fingerprint
//!
//! The engine returns open-ended per-measure dictionaries; rather than
//! assuming specific keys exist, every measure is a small fixed-shape record
//! with all fields optional. Readers of a specific field handle its absence
//! explicitly.
//!
//! A whole-machine snapshot is treated as a value: two snapshots are the
//! same statistics if their canonical JSON hashes to the same digest. The
//! geometry cache keys on that fingerprint instead of deep-comparing the
//! nested maps on every lookup.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Statistics key under which the engine reports element totals.
pub const MEASURE_ELEMENTS: &str = "Elements";

/// Statistics key under which the engine reports vertex totals.
pub const MEASURE_VERTICES: &str = "Vertices";

/// Domain selector meaning "all domains of the row".
pub const ALL_DOMAINS: &str = "ALL";

/// One quality measure or count as reported by the engine.
///
/// Every field is optional: a count-type measure carries only `count`, a
/// bounded quality measure usually carries the extrema and the percentage
/// split, and `units` is present only for dimensional measures.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeasureStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_bad: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_ok: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl MeasureStats {
    /// A pure count measure.
    pub fn count(count: u64) -> Self {
        Self {
            count: Some(count),
            ..Self::default()
        }
    }
}

/// All measures reported by one row's engine, keyed by measure name.
pub type RowStatistics = BTreeMap<String, MeasureStats>;

/// Whole-machine statistics: one [`RowStatistics`] per row name.
///
/// Rows whose query failed are simply absent; the failure lives in the
/// error sink, not here.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    /// Per-row statistics keyed by row name
    pub rows: BTreeMap<String, RowStatistics>,
}

impl StatisticsSnapshot {
    /// Content fingerprint: SHA-256 of the snapshot's canonical JSON.
    ///
    /// Key order is normalized by the canonicalizer, so two snapshots with
    /// equal content always fingerprint identically.
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = serde_json_canonicalizer::to_string(self)
            .map_err(|e| Error::Other(format!("Failed to canonicalize statistics: {e}")))?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(hex::encode(digest))
    }

    /// Element count for one row, zero when the row is absent or reports no
    /// element measure.
    pub fn element_count(&self, row: &str) -> u64 {
        self.rows
            .get(row)
            .and_then(|stats| stats.get(MEASURE_ELEMENTS))
            .and_then(|m| m.count)
            .unwrap_or(0)
    }

    /// Sum of all rows' element counts.
    pub fn total_elements(&self) -> u64 {
        self.rows.keys().map(|row| self.element_count(row)).sum()
    }
}

/// Request for a per-measure histogram from one row's engine.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSpec {
    /// Quality measure to histogram, e.g. "Minimum Face Angle"
    pub variable: String,
    /// Custom bin edges; engine defaults when absent
    pub bins: Option<Vec<f64>>,
    /// Unit override for the bin edges; engine default when absent
    pub units: Option<String>,
}

impl HistogramSpec {
    /// Histogram of `variable` with engine-default bins and units.
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            bins: None,
            units: None,
        }
    }
}

/// Histogram returned by one row's engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Measure the histogram was computed for
    pub variable: String,
    /// Bin edges, one more than `counts`
    pub bin_edges: Vec<f64>,
    /// Per-bin element counts
    pub counts: Vec<u64>,
    /// Units of the bin edges, when dimensional
    pub units: Option<String>,
}
