//! Engine event stream.
//!
//! Events are published after the transition they describe has taken
//! effect. Each subscriber gets its own channel; subscribers whose receiver
//! was dropped are removed on the next publish.
//!
//! ```rust,ignore
//! let events = engine.subscribe();
//! std::thread::spawn(move || {
//!     while let Ok(event) = events.recv() {
//!         println!("{event:?}");
//!     }
//! });
//! ```

use crate::metrics::SyncMetrics;
use catsync_model::{ConflictItem, OperationId, OperationKind, Priority};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one operation reaching a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionEvent {
    /// Operation that finished.
    pub operation_id: OperationId,
    /// Its kind.
    pub kind: OperationKind,
    /// Whether the platform accepted it.
    pub success: bool,
    /// Last error for failures.
    pub error: Option<String>,
    /// Processing time of the final attempt.
    pub duration: Duration,
    /// Originals folded into this operation when it is a batch.
    pub merged_ids: Vec<OperationId>,
}

impl CompletionEvent {
    /// IDs a producer should consider finished: the originals of a batch,
    /// or the operation itself.
    pub fn finished_ids(&self) -> Vec<OperationId> {
        if self.merged_ids.is_empty() {
            vec![self.operation_id]
        } else {
            self.merged_ids.clone()
        }
    }
}

/// An engine event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// An operation was accepted.
    OperationQueued {
        /// Operation ID.
        operation_id: OperationId,
        /// Kind.
        kind: OperationKind,
        /// Priority.
        priority: Priority,
        /// Target entities.
        entity_ids: Vec<i64>,
        /// Originals carried when this is a flushed batch.
        merged_ids: Vec<OperationId>,
    },
    /// An operation completed or failed terminally.
    OperationCompleted(CompletionEvent),
    /// An operation is waiting on manual conflict resolution.
    OperationBlocked {
        /// Operation ID.
        operation_id: OperationId,
        /// Kind.
        kind: OperationKind,
        /// Conflicts found, resolved or not.
        conflicts: Vec<ConflictItem>,
    },
    /// Periodic metrics snapshot.
    MetricsUpdate(SyncMetrics),
}

impl SyncEvent {
    /// Short name of the event type.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::OperationQueued { .. } => "operation_queued",
            SyncEvent::OperationCompleted(_) => "operation_completed",
            SyncEvent::OperationBlocked { .. } => "operation_blocked",
            SyncEvent::MetricsUpdate(_) => "metrics_update",
        }
    }
}

/// Receives every published event synchronously.
///
/// Sinks run on the publishing thread and should return quickly.
pub trait EventSink: Send + Sync {
    /// Handles one event.
    fn publish(&self, event: &SyncEvent);
}

/// A sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<SyncEvent>>,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded events.
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().clone()
    }

    /// Returns the recorded completion events.
    pub fn completions(&self) -> Vec<CompletionEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SyncEvent::OperationCompleted(done) => Some(done.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for EventLog {
    fn publish(&self, event: &SyncEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Fans events out to channel subscribers and registered sinks.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<SyncEvent>>>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventBus {
    /// Creates a bus with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to all future events.
    ///
    /// The receiver should be drained regularly to avoid unbounded memory
    /// growth.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Registers a sink.
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// Publishes an event to every listener.
    pub fn emit(&self, event: SyncEvent) {
        for sink in self.sinks.read().iter() {
            sink.publish(&event);
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live channel subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
