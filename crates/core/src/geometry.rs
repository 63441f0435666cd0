//! Boundary-geometry result cache
//!
//! Boundary-surface extraction is far more expensive than a statistics
//! query, and callers interleave sizing with unrelated read-only calls. The
//! cache stores the last extraction together with the fingerprint of the
//! statistics snapshot it was computed from; while statistics are unchanged,
//! repeated lookups cost nothing beyond the statistics check itself.

use crate::session::Surface;

/// Memoized boundary surfaces keyed by statistics-snapshot fingerprint.
#[derive(Debug, Default)]
pub struct GeometryCache {
    cached: Option<(String, Vec<Surface>)>,
}

impl GeometryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached surfaces, if the cache was built from a snapshot with this
    /// fingerprint.
    pub fn lookup(&self, fingerprint: &str) -> Option<&[Surface]> {
        match &self.cached {
            Some((cached_fp, surfaces)) if cached_fp == fingerprint => Some(surfaces),
            _ => None,
        }
    }

    /// Replace the cache contents with a fresh extraction.
    pub fn store(&mut self, fingerprint: String, surfaces: Vec<Surface>) {
        self.cached = Some((fingerprint, surfaces));
    }

    /// Drop any cached result.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}
