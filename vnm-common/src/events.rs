//! Event types and broadcast bus
//!
//! Events let callers follow long-running work (imports, probe batches)
//! without blocking on the call that started it. Statuses travel as their
//! wire names so this crate stays independent of the engine's types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by the ingestion and lifecycle engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeEvent {
    /// A text import finished (all blocks processed)
    ImportCompleted {
        total_processed: usize,
        added: usize,
        skipped_duplicates: usize,
        replaced_old: usize,
        queued_for_verification: usize,
        format_errors: usize,
        timestamp: DateTime<Utc>,
    },

    /// A node's persisted status changed
    NodeStatusChanged {
        node_id: i64,
        old_status: String,
        new_status: String,
        timestamp: DateTime<Utc>,
    },

    /// A probe batch was accepted
    BatchStarted {
        batch_id: u64,
        probe_kind: String,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// One more node of a batch resolved
    BatchProgress {
        batch_id: u64,
        completed: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// Every node of a batch resolved
    BatchCompleted {
        batch_id: u64,
        succeeded: usize,
        failed: usize,
        timed_out: bool,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`NodeEvent`]s
///
/// Cloning the bus yields another handle on the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NodeEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered before slow receivers
    /// start losing the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: NodeEvent) -> Result<usize, broadcast::error::SendError<NodeEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: NodeEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
