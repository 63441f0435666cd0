//! Machine-wide sizing policy
//!
//! A single scalar intent ("make this machine finer", "hit N elements") is
//! converted into per-row engine parameters. The state is explicit and
//! compared by value before any fan-out: applying settings that match what
//! was last applied is a successful no-op and must not touch the engines.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::MIN_TARGET_ELEMENTS;
use crate::error::{Error, Result};

/// Strategy used to derive the per-row base factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SizingStrategy {
    /// All base factors reset to 1.0
    #[default]
    None,
    /// The row with the smallest average base-topology face area is the
    /// sizing target; every other row's base factor scales its face areas
    /// down toward that minimum
    MinFaceArea,
}

impl std::fmt::Display for SizingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizingStrategy::None => write!(f, "NONE"),
            SizingStrategy::MinFaceArea => write!(f, "MIN_FACE_AREA"),
        }
    }
}

/// The machine's sizing intent: base per-row factors, one global multiplier,
/// and an optional absolute element target that bypasses the factor model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingState {
    /// Strategy the base factors were derived with
    pub strategy: SizingStrategy,
    /// Base factor per row, 1.0 by default
    pub base_factors: BTreeMap<String, f64>,
    /// Machine-wide multiplier applied on top of every base factor
    pub global_factor: f64,
    /// Absolute machine-wide element target, when sizing by count
    pub target_elements: Option<u64>,
}

impl SizingState {
    /// Default sizing for a set of rows: every base factor 1.0, global 1.0.
    pub fn for_rows<'a>(rows: impl IntoIterator<Item = &'a String>) -> Self {
        Self {
            strategy: SizingStrategy::None,
            base_factors: rows.into_iter().map(|r| (r.clone(), 1.0)).collect(),
            global_factor: 1.0,
            target_elements: None,
        }
    }

    /// Effective factor pushed to one row's engine: base × global.
    pub fn effective_factor(&self, row: &str) -> f64 {
        self.base_factors.get(row).copied().unwrap_or(1.0) * self.global_factor
    }

    /// Validate a replacement base-factor table against this state's rows.
    pub fn validate_factors(&self, factors: &BTreeMap<String, f64>) -> Result<()> {
        let available: Vec<String> = self.base_factors.keys().cloned().collect();
        for (row, value) in factors {
            if !self.base_factors.contains_key(row) {
                return Err(Error::UnknownRow {
                    name: row.clone(),
                    available,
                });
            }
            if !value.is_finite() || *value <= 0.0 {
                return Err(Error::InvalidFactor {
                    row: row.clone(),
                    value: *value,
                });
            }
        }
        Ok(())
    }
}

/// Derive MIN_FACE_AREA base factors from per-row average base face areas.
///
/// The row with the smallest area gets factor 1.0; a row with area `a` gets
/// `sqrt(a / min_area)`, which drives its face areas down toward the
/// minimum once applied.
pub fn min_face_area_factors(areas: &BTreeMap<String, f64>) -> Result<BTreeMap<String, f64>> {
    let min_area = areas
        .values()
        .copied()
        .filter(|a| a.is_finite() && *a > 0.0)
        .fold(f64::INFINITY, f64::min);
    if !min_area.is_finite() {
        return Err(Error::Other(
            "No positive face areas available to derive sizing factors".into(),
        ));
    }
    Ok(areas
        .iter()
        .map(|(row, area)| (row.clone(), (area / min_area).sqrt()))
        .collect())
}

/// Reject absolute element targets the engine cannot mesh reliably.
pub fn validate_target_elements(requested: u64) -> Result<()> {
    if requested < MIN_TARGET_ELEMENTS {
        return Err(Error::TargetTooSmall {
            requested,
            minimum: MIN_TARGET_ELEMENTS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn min_face_area_targets_the_smallest_row() {
        // canonical two-row axial fan areas from the engine regression case
        let areas: BTreeMap<String, f64> = [
            ("bladerow1".to_string(), 0.0078),
            ("bladerow2".to_string(), 0.00496),
        ]
        .into();

        let factors = min_face_area_factors(&areas).unwrap();
        assert!(close(factors["bladerow2"], 1.0));
        assert!(close(factors["bladerow1"], (0.0078f64 / 0.00496).sqrt()));
        assert!(factors["bladerow1"] > 1.0);
    }

    #[test]
    fn min_face_area_without_positive_areas_is_an_error() {
        let areas: BTreeMap<String, f64> = [("r".to_string(), 0.0)].into();
        assert!(min_face_area_factors(&areas).is_err());
    }

    #[test]
    fn effective_factor_is_base_times_global() {
        let rows = vec!["rotor".to_string(), "stator".to_string()];
        let mut state = SizingState::for_rows(&rows);
        state.base_factors.insert("rotor".into(), 1.5);
        state.global_factor = 2.0;
        assert!(close(state.effective_factor("rotor"), 3.0));
        assert!(close(state.effective_factor("stator"), 2.0));
    }

    #[test]
    fn identical_states_compare_equal() {
        let rows = vec!["rotor".to_string()];
        let a = SizingState::for_rows(&rows);
        let mut b = SizingState::for_rows(&rows);
        assert_eq!(a, b);
        b.global_factor = 1.1;
        assert_ne!(a, b);
    }

    #[test]
    fn factor_validation_rejects_unknown_rows_and_bad_values() {
        let rows = vec!["rotor".to_string()];
        let state = SizingState::for_rows(&rows);

        let unknown: BTreeMap<String, f64> = [("ghost".to_string(), 1.0)].into();
        assert!(matches!(
            state.validate_factors(&unknown),
            Err(Error::UnknownRow { .. })
        ));

        let negative: BTreeMap<String, f64> = [("rotor".to_string(), -2.0)].into();
        assert!(matches!(
            state.validate_factors(&negative),
            Err(Error::InvalidFactor { .. })
        ));
    }

    #[test]
    fn tiny_element_targets_are_rejected() {
        assert!(matches!(
            validate_target_elements(5_000),
            Err(Error::TargetTooSmall { .. })
        ));
        assert!(validate_target_elements(250_000).is_ok());
    }
}
