//! Machine state snapshot record
//!
//! A saved machine is a small serializable record pointing at per-row
//! persisted engine states, plus the sizing intent needed to reproduce the
//! machine without replaying geometry import. The heavy data lives in the
//! per-row artifacts the engine wrote; the record only references them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sizing::SizingState;

/// Serializable record of one machine, produced by
/// [`Machine::save`](crate::machine::Machine::save).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedState {
    /// The topology-init artifact the machine was built from
    pub source_path: PathBuf,
    /// Row names in machine order
    pub rows: Vec<String>,
    /// Sizing intent at save time: strategy, base factors, global multiplier
    pub sizing: SizingState,
    /// Per-row persisted engine-state artifacts
    pub state_artifacts: BTreeMap<String, PathBuf>,
}

impl SavedState {
    /// Write the record as JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Load a record written by [`SavedState::write`].
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sizing::SizingStrategy;

    #[test]
    fn record_roundtrips_through_json() {
        let rows = vec!["rotor".to_string(), "stator".to_string()];
        let mut sizing = SizingState::for_rows(&rows);
        sizing.strategy = SizingStrategy::MinFaceArea;
        sizing.base_factors.insert("stator".into(), 1.25);
        sizing.global_factor = 0.8;

        let record = SavedState {
            source_path: "/case/fan.tginit".into(),
            rows: rows.clone(),
            sizing,
            state_artifacts: [
                ("rotor".to_string(), PathBuf::from("/case/rotor.tst")),
                ("stator".to_string(), PathBuf::from("/case/stator.tst")),
            ]
            .into(),
        };

        let file = tempfile::NamedTempFile::new().unwrap();
        record.write(file.path()).unwrap();
        let loaded = SavedState::load(file.path()).unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.sizing.base_factors["stator"], 1.25);
    }
}
