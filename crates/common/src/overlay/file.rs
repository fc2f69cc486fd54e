//! Overlay file handles.
//!
//! An overlay file is a virtual file whose identity is its logical name.
//! The byte-level read/write machinery lives with the protocol front end;
//! what matters here is the state (which trees back the file) and the
//! close hook, which turns a create or modification into a queued upload.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::queue::Method;
use crate::tree::TreeEntry;

/// Which trees back an overlay file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    /// Only the remote has it; bytes materialize on first read.
    RemoteOnly,
    /// Only the local cache has it. Client-created iff a creation marker
    /// exists in the work tree.
    LocalOnly,
    /// Present in both; reads prefer local, writes land locally.
    Synced,
    /// Name matches the temp predicate; never queued.
    Temp,
}

/// Callbacks an overlay file needs from its tree.
///
/// The tree constructs files and files call back into the tree at close;
/// the shared state is injected here instead of handing files the whole
/// tree.
#[async_trait]
pub(crate) trait FileHooks: Send + Sync {
    /// Append a deferred mutation for this file (temp names are skipped).
    async fn queue_data(&self, name: &str, method: Method, dest_name: Option<&str>);

    /// Drop an open-handle registration.
    fn release(&self, name: &str);

    /// Consume the created-files entry for this name, if any.
    fn take_created(&self, name: &str) -> bool;
}

/// A virtual file in the overlay.
pub struct OverlayFile {
    path: String,
    state: OverlayState,
    local: Option<TreeEntry>,
    remote: Option<TreeEntry>,
    hooks: Arc<dyn FileHooks>,
    /// Whether this handle counts as an open client handle (files built
    /// by `list` do not).
    registered: bool,
    modified: AtomicBool,
    closed: AtomicBool,
}

impl OverlayFile {
    pub(crate) fn new(
        state: OverlayState,
        local: Option<TreeEntry>,
        remote: Option<TreeEntry>,
        hooks: Arc<dyn FileHooks>,
        registered: bool,
    ) -> Self {
        // Tie-break: the local path wins when both trees have the file.
        let path = local
            .as_ref()
            .or(remote.as_ref())
            .map(|e| e.path.clone())
            .unwrap_or_default();

        Self {
            path,
            state,
            local,
            remote,
            hooks,
            registered,
            modified: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        crate::path::basename(&self.path)
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    pub fn is_dir(&self) -> bool {
        self.local
            .as_ref()
            .or(self.remote.as_ref())
            .map(|e| e.is_dir)
            .unwrap_or(false)
    }

    pub fn local_entry(&self) -> Option<&TreeEntry> {
        self.local.as_ref()
    }

    pub fn remote_entry(&self) -> Option<&TreeEntry> {
        self.remote.as_ref()
    }

    /// Record that the client wrote through this handle.
    pub fn mark_modified(&self) {
        self.modified.store(true, Ordering::SeqCst);
    }

    /// Close the handle. A created file queues a PUT, a modified one a
    /// POST; temp files and read-only handles queue nothing. Idempotent.
    ///
    /// Handles built by `list` are not open client handles; closing them
    /// is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.registered {
            return;
        }

        self.hooks.release(&self.path);

        // Drain the created-files entry even for temp names so they do
        // not accumulate in the set.
        let created = self.hooks.take_created(&self.path);

        if self.state == OverlayState::Temp || self.is_dir() {
            return;
        }

        if created {
            self.hooks.queue_data(&self.path, Method::Put, None).await;
        } else if self.modified.load(Ordering::SeqCst) {
            self.hooks.queue_data(&self.path, Method::Post, None).await;
        }
    }
}

impl std::fmt::Debug for OverlayFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayFile")
            .field("path", &self.path)
            .field("state", &self.state)
            .field("is_dir", &self.is_dir())
            .finish()
    }
}
