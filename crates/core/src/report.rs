//! Best-effort per-row error aggregation
//!
//! Non-fatal worker failures are collected here instead of aborting the
//! machine. The sink is handed to every worker at construction so each code
//! path that can fail has an injected place to report. Recording never
//! fails, never blocks beyond a mutex, and never excludes a row from
//! further operations.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::session::EngineSession;

/// Shared, clonable collector of per-row error and warning messages.
#[derive(Debug, Clone, Default)]
pub struct ErrorSink {
    inner: Arc<Mutex<BTreeMap<String, Vec<String>>>>,
}

impl ErrorSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one message against a row. Purely additive bookkeeping.
    pub fn record(&self, row: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(row = %row, "{message}");
        self.inner
            .lock()
            .entry(row.to_string())
            .or_default()
            .push(message);
    }

    /// Drain a session's engine-side error channel into the sink.
    ///
    /// Called opportunistically after steps that are known to queue engine
    /// warnings, e.g. a topology read.
    pub async fn drain_session(&self, row: &str, session: &dyn EngineSession) {
        for message in session.drain_error_channel().await {
            self.record(row, message);
        }
    }

    /// All recorded messages keyed by row name.
    pub fn report(&self) -> BTreeMap<String, Vec<String>> {
        self.inner.lock().clone()
    }

    /// Whether any message has been recorded.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
