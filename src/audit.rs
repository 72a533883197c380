//! Security audit events.
//!
//! The service reports noteworthy events (authentication failures, use of deprecated algorithms,
//! rejected configurations, rotation outcomes) to an [`AuditSink`]. Events never carry key bytes
//! or plaintext; keys are named by their [`KeyId`](crate::key::KeyId).

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use std::fmt;

/// What happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    AuthenticationFailure,
    DeprecatedAlgorithm,
    ConfigurationRejected,
    KeyDerived,
    RotationFinished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub severity: Severity,
    pub detail: String,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, severity: Severity, detail: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:?}] {:?}: {}", self.severity, self.kind, self.detail)
    }
}

/// Receives audit events. Implementations must not block for long; they are called inline.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Forwards events to `tracing`, at a level matching their severity.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match event.severity {
            Severity::Info => info!(target: "audit", kind = ?event.kind, "{}", event.detail),
            Severity::Warning => warn!(target: "audit", kind = ?event.kind, "{}", event.detail),
            Severity::Critical => error!(target: "audit", kind = ?event.kind, "{}", event.detail),
        }
    }
}

/// Keeps every event in memory, in order. Owned by the caller and shared with the service
/// through an `Arc`.
#[derive(Debug, Default)]
pub struct AuditHistory {
    events: Mutex<Vec<AuditEvent>>,
}

impl AuditHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, kind: AuditKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for AuditHistory {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn history_records_in_order() {
        let history = Arc::new(AuditHistory::new());
        let sink: Arc<dyn AuditSink> = history.clone();
        sink.record(AuditEvent::new(AuditKind::KeyDerived, Severity::Info, "first"));
        sink.record(AuditEvent::new(
            AuditKind::AuthenticationFailure,
            Severity::Warning,
            "second",
        ));
        let events = history.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].detail, "first");
        assert_eq!(history.count(AuditKind::AuthenticationFailure), 1);
        history.clear();
        assert!(history.events().is_empty());
    }

    #[test]
    fn shared_across_threads() {
        let history = Arc::new(AuditHistory::new());
        std::thread::scope(|s| {
            for i in 0..4 {
                let history = &history;
                s.spawn(move || {
                    for _ in 0..25 {
                        history.record(AuditEvent::new(
                            AuditKind::KeyDerived,
                            Severity::Info,
                            format!("worker {}", i),
                        ));
                    }
                });
            }
        });
        assert_eq!(history.count(AuditKind::KeyDerived), 100);
    }

    #[test]
    fn tracing_sink_accepts_all_levels() {
        let sink = TracingAuditSink;
        for severity in [Severity::Info, Severity::Warning, Severity::Critical] {
            sink.record(AuditEvent::new(AuditKind::ConfigurationRejected, severity, "x"));
        }
        let shown = AuditEvent::new(AuditKind::KeyDerived, Severity::Info, "detail").to_string();
        assert_eq!(shown, "[Info] KeyDerived: detail");
    }
}
