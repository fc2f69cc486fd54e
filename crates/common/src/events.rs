//! Share lifecycle events.
//!
//! The overlay tree and the sync processor report out-of-band conditions
//! as events rather than errors: sync progress, purged queue entries, and
//! merge conflicts. Subscribers (the admin API, a protocol front end, or
//! tests) receive them over a broadcast channel.

use tokio::sync::broadcast;

use crate::queue::QueueEntry;

/// Events emitted by the overlay tree and the sync processor.
#[derive(Debug, Clone)]
pub enum ShareEvent {
    /// The sync processor started draining a parent directory.
    SyncStart { parent: String },

    /// The sync processor finished a parent directory.
    SyncEnd { parent: String, completed: usize },

    /// A queue entry failed against the remote. The entry stays queued
    /// (transient) or counts toward the purge limit (permanent).
    SyncError { path: String, message: String },

    /// Entries exceeded the retry limit and were dropped from the queue.
    Purged { entries: Vec<QueueEntry> },

    /// An orphaned local file could not be reconciled: it is gone from the
    /// remote but still has local state that forbids deletion.
    Conflict { path: String },
}

/// Cloneable sender side of the share event channel.
///
/// Sending never blocks; events are dropped when no subscriber is
/// listening, which is fine for a lossy notification stream.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: broadcast::Sender<ShareEvent>,
}

impl EventSender {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: ShareEvent) {
        // A send error only means there are currently no subscribers.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShareEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new(256)
    }
}
