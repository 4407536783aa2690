//! Tracking sink boundary
//!
//! Classified errors are forwarded exactly once per `handle` call to a
//! [`TrackingSink`]. The sink is fire-and-forget: implementations must not
//! panic or otherwise fail back into the classification path.

use std::sync::Mutex;

use serde_json::{Map, Value};

use crate::error::{ClassifiedError, Severity};

/// Outbound observability boundary.
pub trait TrackingSink: Send + Sync {
    /// Record a classified error with its diagnostic context. Must not
    /// panic; delivery failures are the sink's own problem to log.
    fn track(&self, error: &ClassifiedError, context: &Map<String, Value>, level: Severity);
}

/// Default sink: structured `tracing` events, severity mapped to level.
#[derive(Debug, Default)]
pub struct TracingSink;

impl TrackingSink for TracingSink {
    fn track(&self, error: &ClassifiedError, context: &Map<String, Value>, level: Severity) {
        let context = Value::Object(context.clone());
        match level {
            Severity::Low | Severity::Medium => tracing::warn!(
                kind = error.kind.name(),
                severity = ?level,
                %context,
                "{}",
                error.message
            ),
            Severity::High | Severity::Critical => tracing::error!(
                kind = error.kind.name(),
                severity = ?level,
                %context,
                "{}",
                error.message
            ),
        }
    }
}

/// Test sink that records every tracked error.
#[derive(Debug, Default)]
pub struct RecordingSink {
    tracked: Mutex<Vec<(ClassifiedError, Severity)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked(&self) -> Vec<(ClassifiedError, Severity)> {
        self.tracked
            .lock()
            .map(|tracked| tracked.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.tracked.lock().map(|tracked| tracked.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TrackingSink for RecordingSink {
    fn track(&self, error: &ClassifiedError, _context: &Map<String, Value>, level: Severity) {
        if let Ok(mut tracked) = self.tracked.lock() {
            tracked.push((error.clone(), level));
        }
    }
}
