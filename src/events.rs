//! Pipeline events
//!
//! Each publish call receives its own sink, so concurrent publishes never
//! see each other's events.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::phases::PhaseKind;
use crate::project::PublishingProject;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PipelineEvent {
    Progress {
        phase: PhaseKind,
        progress: u8,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        phase: PhaseKind,
        error: String,
        timestamp: DateTime<Utc>,
    },
    Complete {
        result: Box<PublishingProject>,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn progress(phase: PhaseKind, progress: u8, message: impl Into<String>) -> Self {
        Self::Progress { phase, progress, message: message.into(), timestamp: Utc::now() }
    }

    pub fn error(phase: PhaseKind, error: impl Into<String>) -> Self {
        Self::Error { phase, error: error.into(), timestamp: Utc::now() }
    }

    pub fn complete(result: PublishingProject) -> Self {
        Self::Complete { result: Box::new(result), timestamp: Utc::now() }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Observer for one publish call.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: PipelineEvent) {}
}

/// A closed receiver is not an error; the publish keeps going.
impl EventSink for UnboundedSender<PipelineEvent> {
    fn emit(&self, event: PipelineEvent) {
        let _ = self.send(event);
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = PipelineEvent::progress(PhaseKind::Packaging, 50, "Packaging completed");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["phase"], "packaging");
        assert_eq!(json["progress"], 50);
        assert!(json["timestamp"].is_string());

        let json = serde_json::to_value(PipelineEvent::error(PhaseKind::IdentifierAcquisition, "boom")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["phase"], "identifier-acquisition");
        assert_eq!(json["error"], "boom");
    }

    #[tokio::test]
    async fn test_channel_sink_survives_dropped_receiver() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tx.emit(PipelineEvent::progress(PhaseKind::Cover, 65, "x"));
        assert!(rx.recv().await.is_some());
        drop(rx);
        tx.emit(PipelineEvent::progress(PhaseKind::Cover, 65, "y"));
    }
}
