//! Durable request queue.
//!
//! Client mutations against the share are not applied to the remote
//! inline; they are captured as queue entries keyed by parent directory
//! and replayed later by the sync processor. Entries within a parent are
//! FIFO; the key scheme lets a whole directory's entries be removed or
//! re-parented in one statement.

mod store;

pub use store::SqliteQueue;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// HTTP-shaped method of a deferred mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Upload a client-created file.
    Put,
    /// Upload a modified, previously synced file.
    Post,
    /// Delete a file.
    Delete,
    /// Move a file to a new logical name.
    Move,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Move => "MOVE",
        }
    }
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PUT" => Ok(Method::Put),
            "POST" => Ok(Method::Post),
            "DELETE" => Ok(Method::Delete),
            "MOVE" => Ok(Method::Move),
            other => Err(format!("unknown queue method: {}", other)),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deferred mutation, as written to durable storage.
///
/// The prefixes are absolute roots captured at enqueue time so the
/// processor can resolve bytes and remote URLs at replay time, even after
/// a restart with a different configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub method: Method,
    /// Logical source name.
    pub path: String,
    /// Logical destination name, for MOVE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_path: Option<String>,
    /// Remote root URL prefix at enqueue time.
    pub remote_prefix: String,
    /// Local tree root at enqueue time.
    pub local_prefix: String,
}

/// A queue entry with its storage identity and retry bookkeeping.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub id: i64,
    /// Parent-directory key the entry is filed under.
    pub parent: String,
    pub entry: QueueEntry,
    /// Failed replay attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Aggregate queue counters for the admin API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub failed: u64,
    pub parents: u64,
}

/// Contract of the durable request queue.
///
/// The first four methods are the overlay-facing surface; the rest is the
/// drain-side surface the sync processor consumes. Entries within a parent
/// replay in insertion order.
#[async_trait]
pub trait RequestQueue: Send + Sync {
    /// Append an entry under `parent(entry.path)`.
    async fn queue_request(&self, entry: QueueEntry) -> Result<()>;

    /// Pending requests for a parent directory, as basename → method.
    /// When a basename has several pending entries the most recent wins,
    /// so a queued DELETE hides the name even if a PUT precedes it.
    async fn get_requests(&self, parent: &str) -> Result<HashMap<String, Method>>;

    /// Remove every entry whose parent key is `prefix` or lies below it.
    /// Returns the number of removed entries.
    async fn remove_path(&self, prefix: &str) -> Result<u64>;

    /// Re-parent pending entries after a directory rename: rewrites the
    /// parent key, `path`, and `dest_path` of affected entries.
    async fn update_path(&self, old_prefix: &str, new_prefix: &str) -> Result<u64>;

    /// Parent directories that currently have pending entries, oldest
    /// entry first.
    async fn pending_parents(&self) -> Result<Vec<String>>;

    /// All pending entries for a parent, FIFO.
    async fn entries_for(&self, parent: &str) -> Result<Vec<StoredEntry>>;

    /// Whether any pending entry references the logical name `path`
    /// (as source or MOVE destination).
    async fn has_entry_for(&self, path: &str) -> Result<bool>;

    /// Remove a successfully replayed (or purged) entry.
    async fn complete(&self, id: i64) -> Result<()>;

    /// Record a failed attempt; returns the updated attempt count.
    async fn fail(&self, id: i64, error: &str) -> Result<u32>;

    /// Aggregate counters.
    async fn stats(&self) -> Result<QueueStats>;
}
