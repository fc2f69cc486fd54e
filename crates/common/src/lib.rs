//! Core library for cirrus: a write-through, read-caching overlay of a
//! remote content repository.
//!
//! The pieces compose as follows: a [`Share`](share::Share) ties together
//! a local content tree, a sidecar work tree, and a remote prefix; the
//! [`OverlayTree`](overlay::OverlayTree) merges local and remote views
//! and captures mutations in a durable [request queue](queue); the
//! [`SyncProcessor`](sync::SyncProcessor) replays the queue against the
//! remote in the background, reporting progress and conflicts as
//! [`ShareEvent`](events::ShareEvent)s.

pub mod error;
pub mod events;
pub mod overlay;
pub mod path;
pub mod queue;
pub mod share;
pub mod sync;
pub mod tree;

pub use error::{Result, TreeError};
pub use events::{EventSender, ShareEvent};
pub use overlay::{marker_name, OverlayFile, OverlayState, OverlayTree};
pub use queue::{Method, QueueEntry, QueueStats, RequestQueue, SqliteQueue, StoredEntry};
pub use share::{CacheStats, ContentCache, ContentCacheConfig, Share, ShareConfig};
pub use sync::{SyncConfig, SyncProcessor};
pub use tree::{FsTree, HttpTree, RemoteTree, Tree, TreeEntry};
