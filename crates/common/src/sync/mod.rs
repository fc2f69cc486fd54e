//! Background synchronization of queued mutations against the remote.

mod processor;

pub use processor::{SyncConfig, SyncProcessor};
