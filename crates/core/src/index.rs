//! Boundary-level file indexes
//!
//! Full geometry parsing belongs to the engine; the orchestrator only ever
//! reads the parts of a case it needs to drive workers: the machine manifest
//! (row order and interface method), the row names listed in a geometry
//! description, and the auxiliary files a geometry file references so the
//! staging transport can push them without guessing at naming conventions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How adjacent rows of a manifest-described machine meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceMethod {
    /// Every row's openings are independently extended to infinity
    #[serde(rename = "Fully Extend")]
    FullyExtend,
    /// Adjacent rows are linked via curve files derived from the neighboring
    /// row's geometry file
    #[serde(rename = "Neighbors")]
    Neighbors,
}

/// Inlet/outlet linkage for one row: curve files of the left and right
/// neighbor, when the interface method links them.
pub type NeighborCurves = (Option<PathBuf>, Option<PathBuf>);

/// The multi-row machine manifest: row order plus the interface method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineManifest {
    /// Declared number of rows; must match `rows.len()`
    #[serde(rename = "Number of Blade Rows")]
    pub row_count: usize,
    /// How adjacent rows meet
    #[serde(rename = "Interface Method")]
    pub interface_method: InterfaceMethod,
    /// Per-row geometry file names, in machine order
    #[serde(rename = "Blade Rows")]
    pub rows: Vec<String>,
}

impl MachineManifest {
    /// Load and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let manifest: MachineManifest = serde_json::from_str(&text)?;
        if manifest.rows.len() != manifest.row_count {
            return Err(Error::Manifest(format!(
                "Manifest declares {} blade rows but lists {}",
                manifest.row_count,
                manifest.rows.len()
            )));
        }
        if manifest.rows.is_empty() {
            return Err(Error::Manifest("Manifest lists no blade rows".into()));
        }
        Ok(manifest)
    }

    /// Neighbor curve files per row, resolved against `base_dir`.
    ///
    /// With `FullyExtend` every row gets `(None, None)`. With `Neighbors`,
    /// interior edges link to the adjacent row's curve file, which carries
    /// the neighbor's file stem with a `.crv` extension.
    pub fn neighbor_curves(&self, base_dir: &Path) -> BTreeMap<String, NeighborCurves> {
        let curve_of = |row: &String| {
            let stem = Path::new(row)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| row.clone());
            base_dir.join(format!("{stem}.crv"))
        };

        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let curves = match self.interface_method {
                    InterfaceMethod::FullyExtend => (None, None),
                    InterfaceMethod::Neighbors => {
                        let left = (i > 0).then(|| curve_of(&self.rows[i - 1]));
                        let right =
                            (i + 1 < self.rows.len()).then(|| curve_of(&self.rows[i + 1]));
                        (left, right)
                    }
                };
                (row.clone(), curves)
            })
            .collect()
    }
}

/// Key/value index of a per-row geometry description file.
///
/// The format is line oriented: `!` starts a comment, everything else is a
/// `Key: Value` pair. Keys ending in `File` name auxiliary inputs (hub,
/// shroud and profile curves) relative to the geometry file's directory.
#[derive(Debug, Clone)]
pub struct GeometryIndex {
    entries: BTreeMap<String, String>,
    base_dir: PathBuf,
}

impl GeometryIndex {
    /// Parse the index of a geometry description file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let base_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let mut entries = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('!') {
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                entries.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        if entries.is_empty() {
            return Err(Error::GeometryIndex(format!(
                "{} contains no index entries",
                path.display()
            )));
        }
        Ok(Self { entries, base_dir })
    }

    /// Value of one index entry.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Auxiliary files referenced by the index, resolved against the
    /// geometry file's own directory.
    pub fn auxiliary_files(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter(|(key, _)| key.ends_with("File"))
            .map(|(_, value)| self.base_dir.join(value))
            .collect()
    }
}

/// Scan a geometry description for its blade-row names.
///
/// Rows appear as `<bladerow>` elements whose leading text is the row name;
/// unnamed rows get `bladerowN` with N counting from 1, matching the engine's
/// own convention. Uniqueness is checked by the machine, not here.
pub fn scan_blade_rows(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    let mut names = Vec::new();
    let mut rest = text.as_str();
    while let Some(start) = rest.find("<bladerow>") {
        rest = &rest[start + "<bladerow>".len()..];
        let end = rest.find('<').unwrap_or(rest.len());
        let name = rest[..end].trim();
        if name.is_empty() {
            names.push(format!("bladerow{}", names.len() + 1));
        } else {
            names.push(name.to_string());
        }
    }
    if names.is_empty() {
        return Err(Error::GeometryIndex(format!(
            "No blade rows found in {}",
            path.display()
        )));
    }
    Ok(names)
}
