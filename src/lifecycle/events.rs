//! Lifecycle Events
//!
//! Structured status events published while a run progresses, for a
//! presentation layer to render.

use crate::classification::VmCategory;
use crate::domain::ports::{Direction, OperationKind};
use crate::lifecycle::phase::PhaseState;
use crate::lifecycle::report::HostOutcome;
use crate::lifecycle::tracker::OperationState;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Capacity of the event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Events emitted by the lifecycle orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    RunStarted {
        direction: Direction,
        cluster: String,
    },

    SnapshotTaken {
        hosts: usize,
        vms: usize,
    },

    PhaseStarted {
        direction: Direction,
        category: VmCategory,
        members: usize,
    },

    PhaseStateChanged {
        category: VmCategory,
        state: PhaseState,
    },

    OperationFinished {
        target: String,
        kind: OperationKind,
        state: OperationState,
        error: Option<String>,
    },

    ForceStopIssued {
        category: VmCategory,
        targets: Vec<String>,
    },

    PhaseCompleted {
        category: VmCategory,
        attempted: usize,
        succeeded: usize,
        forced: usize,
        failed: Vec<String>,
    },

    GraceDelay {
        after: VmCategory,
        secs: u64,
    },

    HostTransition {
        outcome: HostOutcome,
    },

    RunCompleted {
        direction: Direction,
        success: bool,
        cancelled: bool,
    },
}

impl LifecycleEvent {
    /// Category the event belongs to, for phase-scoped events
    pub fn category(&self) -> Option<&VmCategory> {
        match self {
            LifecycleEvent::PhaseStarted { category, .. }
            | LifecycleEvent::PhaseStateChanged { category, .. }
            | LifecycleEvent::ForceStopIssued { category, .. }
            | LifecycleEvent::PhaseCompleted { category, .. } => Some(category),
            LifecycleEvent::GraceDelay { after, .. } => Some(after),
            _ => None,
        }
    }
}

/// Sending half of the event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; having no subscribers is fine
    pub fn emit(&self, event: LifecycleEvent) {
        trace!(
            category = event.category().map(VmCategory::id),
            "status event: {:?}",
            event
        );
        let _ = self.tx.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_category() {
        let event = LifecycleEvent::GraceDelay {
            after: VmCategory::Priority,
            secs: 60,
        };
        assert_eq!(event.category(), Some(&VmCategory::Priority));

        let event = LifecycleEvent::SnapshotTaken { hosts: 3, vms: 11 };
        assert!(event.category().is_none());
    }

    #[tokio::test]
    async fn test_sink_delivers_to_subscribers() {
        let sink = EventSink::new();
        sink.emit(LifecycleEvent::SnapshotTaken { hosts: 1, vms: 1 });

        let mut rx = sink.subscribe();
        sink.emit(LifecycleEvent::RunCompleted {
            direction: Direction::Startup,
            success: true,
            cancelled: false,
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, LifecycleEvent::RunCompleted { success: true, .. }));
    }
}
