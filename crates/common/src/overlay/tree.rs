//! The overlay tree proper: merge of local and remote listings, mutation
//! routing, and queueing of deferred requests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::file::{FileHooks, OverlayFile, OverlayState};
use super::marker_name;
use crate::error::{Result, TreeError};
use crate::events::ShareEvent;
use crate::path;
use crate::queue::{Method, QueueEntry, RequestQueue};
use crate::share::Share;
use crate::tree::{FsTree, RemoteTree, Tree, TreeEntry};

/// State shared between the tree and the overlay files it hands out.
///
/// Files call back into this at close instead of holding the tree itself.
struct OverlayShared<R, Q> {
    share: Arc<Share>,
    local: FsTree,
    work: FsTree,
    remote: Arc<R>,
    queue: Arc<Q>,
    /// Names created by clients and not yet closed. Drained at close to
    /// decide PUT (fresh create) vs POST (modification).
    created_files: Mutex<HashSet<String>>,
    /// Open client handles per logical name.
    open_handles: Mutex<HashMap<String, usize>>,
}

impl<R, Q> OverlayShared<R, Q>
where
    R: RemoteTree + Send + Sync + 'static,
    Q: RequestQueue + 'static,
{
    fn register_open(&self, name: &str) {
        let mut handles = self.open_handles.lock().expect("overlay state lock poisoned");
        *handles.entry(path::normalize(name)).or_insert(0) += 1;
    }

    fn is_open(&self, name: &str) -> bool {
        let handles = self.open_handles.lock().expect("overlay state lock poisoned");
        handles.get(&path::normalize(name)).copied().unwrap_or(0) > 0
    }

    fn track_created(&self, name: &str) {
        let mut created = self.created_files.lock().expect("overlay state lock poisoned");
        created.insert(path::normalize(name));
    }

    fn untrack_created(&self, name: &str) -> bool {
        let mut created = self.created_files.lock().expect("overlay state lock poisoned");
        created.remove(&path::normalize(name))
    }

    fn retrack_created(&self, old_name: &str, new_name: &str) {
        let mut created = self.created_files.lock().expect("overlay state lock poisoned");
        if created.remove(&path::normalize(old_name)) {
            created.insert(path::normalize(new_name));
        }
    }

    /// Remove the creation marker and any sidecar entry for a name from
    /// the work tree. Absence is fine.
    async fn remove_sidecars(&self, name: &str) {
        for sidecar in [marker_name(name), path::normalize(name)] {
            match self.work.open(&sidecar).await {
                Ok(entry) => {
                    let removed = if entry.is_dir {
                        self.work.delete_directory(&sidecar).await
                    } else {
                        self.work.delete(&sidecar).await
                    };
                    if let Err(err) = removed {
                        warn!(path = %sidecar, error = %err, "failed to remove sidecar");
                    }
                }
                Err(TreeError::NotFound(_)) => {}
                Err(err) => {
                    warn!(path = %sidecar, error = %err, "failed to stat sidecar");
                }
            }
        }
    }
}

#[async_trait]
impl<R, Q> FileHooks for OverlayShared<R, Q>
where
    R: RemoteTree + Send + Sync + 'static,
    Q: RequestQueue + 'static,
{
    async fn queue_data(&self, name: &str, method: Method, dest_name: Option<&str>) {
        let name = path::normalize(name);
        let dest = dest_name.map(path::normalize);

        let name_temp = self.share.is_temp_name(&name);
        let skip = match method {
            // A move is skipped only when both ends are temporary; a file
            // entering or leaving the persistent namespace is queued.
            Method::Move => {
                name_temp
                    && dest
                        .as_deref()
                        .map(|d| self.share.is_temp_name(d))
                        .unwrap_or(true)
            }
            _ => name_temp,
        };
        if skip {
            debug!(path = %name, method = %method, "temp name, not queued");
            return;
        }

        let entry = QueueEntry {
            method,
            path: name.clone(),
            dest_path: dest,
            remote_prefix: self.share.config().remote_prefix.to_string(),
            local_prefix: self.local.root().to_string_lossy().to_string(),
        };

        // Queue failures do not fail the client-facing mutation: local
        // state is already authoritative and the processor retries.
        if let Err(err) = self.queue.queue_request(entry).await {
            warn!(path = %name, method = %method, error = %err, "failed to enqueue request");
        }
    }

    fn release(&self, name: &str) {
        let mut handles = self.open_handles.lock().expect("overlay state lock poisoned");
        let key = path::normalize(name);
        if let Some(count) = handles.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                handles.remove(&key);
            }
        }
    }

    fn take_created(&self, name: &str) -> bool {
        self.untrack_created(name)
    }
}

/// The merged L∪R view exposed to clients.
///
/// Generic over the remote tree and the queue so tests can substitute
/// scripted doubles; the local and work trees are plain filesystems.
pub struct OverlayTree<R, Q> {
    shared: Arc<OverlayShared<R, Q>>,
}

impl<R, Q> Clone for OverlayTree<R, Q> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<R, Q> OverlayTree<R, Q>
where
    R: RemoteTree + Send + Sync + 'static,
    Q: RequestQueue + 'static,
{
    /// Build the overlay over a share's local and work roots.
    pub fn new(share: Arc<Share>, remote: Arc<R>, queue: Arc<Q>) -> Result<Self> {
        let local = FsTree::new(&share.config().local_path)?;
        let work = FsTree::new(&share.config().work_path)?;

        Ok(Self {
            shared: Arc::new(OverlayShared {
                share,
                local,
                work,
                remote,
                queue,
                created_files: Mutex::new(HashSet::new()),
                open_handles: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn share(&self) -> &Share {
        &self.shared.share
    }

    /// Local tree root, needed by the sync processor to resolve bytes.
    pub fn local_root(&self) -> &std::path::Path {
        self.shared.local.root()
    }

    fn hooks(&self) -> Arc<dyn FileHooks> {
        self.shared.clone()
    }

    /// A locally present file is visible even when the remote is not
    /// reachable; otherwise the remote decides.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        if self.shared.local.exists(name).await? {
            return Ok(true);
        }
        self.shared.remote.exists(name).await
    }

    /// Open a file by logical name. The two existence probes run
    /// concurrently; the resulting state follows the (remote, local)
    /// matrix, with temp names short-circuiting to `Temp`.
    pub async fn open(&self, name: &str) -> Result<OverlayFile> {
        let name = path::normalize(name);

        let (remote_exists, local_exists) = tokio::join!(
            self.shared.remote.exists(&name),
            self.shared.local.exists(&name)
        );
        let (remote_exists, local_exists) = (remote_exists?, local_exists?);

        if !remote_exists && !local_exists {
            return Err(TreeError::NotFound(name));
        }

        let local = if local_exists {
            Some(self.shared.local.open(&name).await?)
        } else {
            None
        };
        let remote = if remote_exists {
            Some(self.shared.remote.open(&name).await?)
        } else {
            None
        };

        let state = if self.shared.share.is_temp_name(&name) {
            OverlayState::Temp
        } else {
            match (remote_exists, local_exists) {
                (true, false) => OverlayState::RemoteOnly,
                (true, true) => OverlayState::Synced,
                (false, true) => OverlayState::LocalOnly,
                (false, false) => unreachable!("handled above"),
            }
        };

        self.shared.register_open(&name);
        Ok(OverlayFile::new(state, local, remote, self.hooks(), true))
    }

    /// Merge the remote and local listings for a pattern.
    ///
    /// The result preserves remote order with local-only entries appended
    /// in local order, so clients paginating against a stable remote see
    /// a stable prefix. The result is a snapshot: L and R may change
    /// under it, and that is acceptable.
    pub async fn list(&self, pattern: &str) -> Result<Vec<OverlayFile>> {
        let parent = path::parent(pattern);

        // A parent the remote has never seen lists as empty; any other
        // remote failure is fatal to the operation.
        let remote_files = match self.shared.remote.list(pattern).await {
            Ok(files) => files,
            Err(TreeError::NotFound(_)) => Vec::new(),
            Err(err) => return Err(err),
        };

        // Without local state under this parent there is nothing to merge.
        if !self.shared.local.exists(&parent).await? {
            return Ok(remote_files
                .into_iter()
                .map(|r| {
                    OverlayFile::new(OverlayState::RemoteOnly, None, Some(r), self.hooks(), false)
                })
                .collect());
        }

        let local_files = self.shared.local.list(pattern).await?;
        let pending = self.shared.queue.get_requests(&parent).await?;
        let pending_deletes: HashSet<String> = pending
            .iter()
            .filter(|(_, m)| **m == Method::Delete)
            .map(|(name, _)| path::nfkd_key(name))
            .collect();

        // Remote pass: keep remote entries not hidden by a queued delete,
        // remembering each position for the local pass.
        let mut remote_kept: Vec<TreeEntry> = Vec::new();
        let mut lookup: HashMap<String, usize> = HashMap::new();
        for r in remote_files {
            let key = path::nfkd_key(&r.name);
            if pending_deletes.contains(&key) {
                debug!(path = %r.path, "hidden by queued delete");
                continue;
            }
            lookup.insert(key, remote_kept.len());
            remote_kept.push(r);
        }

        // Local pass: temp names pass through, matches upgrade the remote
        // slot to Synced, the rest are client-created or orphaned.
        let mut matched: HashMap<usize, TreeEntry> = HashMap::new();
        let mut appended: Vec<(TreeEntry, OverlayState)> = Vec::new();
        for l in local_files {
            if self.shared.share.is_temp_name(&l.path) {
                appended.push((l, OverlayState::Temp));
                continue;
            }

            if let Some(&idx) = lookup.get(&path::nfkd_key(&l.name)) {
                matched.insert(idx, l);
                continue;
            }

            if self.shared.work.exists(&marker_name(&l.path)).await? {
                // Client-created, upload not yet confirmed.
                appended.push((l, OverlayState::LocalOnly));
                continue;
            }

            // Orphan: previously synced, since vanished from the remote.
            if self.can_delete(&l).await? {
                info!(path = %l.path, "removing orphaned local file");
                let removed = if l.is_dir {
                    self.shared.local.delete_directory(&l.path).await
                } else {
                    self.shared.local.delete(&l.path).await
                };
                if let Err(err) = removed {
                    warn!(path = %l.path, error = %err, "orphan removal failed");
                    appended.push((l, OverlayState::LocalOnly));
                    continue;
                }
                self.shared.remove_sidecars(&l.path).await;
                continue;
            }

            // The file may need deletion but has local state forbidding
            // it; surface it and keep it visible.
            self.shared
                .share
                .events()
                .emit(ShareEvent::Conflict {
                    path: l.path.clone(),
                });
            appended.push((l, OverlayState::LocalOnly));
        }

        let mut files = Vec::with_capacity(remote_kept.len() + appended.len());
        for (idx, r) in remote_kept.into_iter().enumerate() {
            match matched.remove(&idx) {
                // Tie-break: the merged entry uses the local path.
                Some(l) => files.push(OverlayFile::new(
                    OverlayState::Synced,
                    Some(l),
                    Some(r),
                    self.hooks(),
                    false,
                )),
                None => files.push(OverlayFile::new(
                    OverlayState::RemoteOnly,
                    None,
                    Some(r),
                    self.hooks(),
                    false,
                )),
            }
        }
        for (l, state) in appended {
            files.push(OverlayFile::new(state, Some(l), None, self.hooks(), false));
        }

        Ok(files)
    }

    /// Create a file in the local tree with a creation marker. The PUT is
    /// queued when the returned handle is closed.
    pub async fn create_file(&self, name: &str) -> Result<OverlayFile> {
        let name = path::normalize(name);

        let local = self.shared.local.create_file(&name).await?;

        // A stale marker can survive a crash between a past create and
        // its confirmation; creating over it is correct either way.
        match self.shared.work.create_file(&marker_name(&name)).await {
            Ok(_) | Err(TreeError::AlreadyExists(_)) => {}
            Err(err) => return Err(err),
        }

        self.shared.track_created(&name);
        self.shared
            .share
            .invalidate_content_cache(&path::parent(&name), false);

        let state = if self.shared.share.is_temp_name(&name) {
            OverlayState::Temp
        } else {
            OverlayState::LocalOnly
        };

        self.shared.register_open(&name);
        Ok(OverlayFile::new(state, Some(local), None, self.hooks(), true))
    }

    /// Create a directory locally and eagerly on the remote. Empty
    /// directories are cheap on the remote and the queue key scheme
    /// relies on directory existence.
    pub async fn create_directory(&self, name: &str) -> Result<OverlayFile> {
        let name = path::normalize(name);

        let local = self.shared.local.create_directory(&name).await?;

        match self.shared.remote.create_directory(&name).await {
            Ok(_) | Err(TreeError::AlreadyExists(_)) => {}
            Err(err) => return Err(err),
        }

        self.shared
            .share
            .invalidate_content_cache(&path::parent(&name), false);

        Ok(OverlayFile::new(
            OverlayState::Synced,
            Some(local),
            None,
            self.hooks(),
            false,
        ))
    }

    /// Delete a file: locally cached files are removed from L, the delete
    /// queued (temp names excluded), and sidecars cleaned up; otherwise
    /// the delete is forwarded to the remote.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let name = path::normalize(name);

        if self.shared.local.exists(&name).await? {
            self.shared.local.delete(&name).await?;
            self.shared.untrack_created(&name);
            self.shared
                .share
                .invalidate_content_cache(&path::parent(&name), false);
            self.shared.queue_data(&name, Method::Delete, None).await;
            self.shared.remove_sidecars(&name).await;
            return Ok(());
        }

        self.shared.remote.delete(&name).await
    }

    /// Delete a directory: local subtree, eager remote delete, pending
    /// queue entries under the prefix, and the work-tree subtree.
    pub async fn delete_directory(&self, name: &str) -> Result<()> {
        let name = path::normalize(name);

        if !self.shared.local.exists(&name).await? {
            return self.shared.remote.delete_directory(&name).await;
        }

        self.shared.local.delete_directory(&name).await?;
        self.shared.share.invalidate_content_cache(&name, true);

        match self.shared.remote.delete_directory(&name).await {
            Ok(()) | Err(TreeError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        if let Err(err) = self.shared.queue.remove_path(&name).await {
            warn!(path = %name, error = %err, "failed to drop queued requests for deleted directory");
        }

        if self.shared.work.exists(&name).await? {
            self.shared.work.delete_directory(&name).await?;
        }

        Ok(())
    }

    /// Rename. Directories rename eagerly on the remote and re-parent
    /// their pending queue entries; files queue a MOVE.
    pub async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let old = path::normalize(old_name);
        let new = path::normalize(new_name);

        if !self.shared.local.exists(&old).await? {
            return self.shared.remote.rename(&old, &new).await;
        }

        self.shared.local.rename(&old, &new).await?;
        self.shared
            .share
            .invalidate_content_cache(&path::parent(&old), false);
        self.shared
            .share
            .invalidate_content_cache(&path::parent(&new), false);

        if self.shared.work.exists(&marker_name(&old)).await? {
            self.shared
                .work
                .rename(&marker_name(&old), &marker_name(&new))
                .await?;
        }
        if self.shared.work.exists(&old).await? {
            self.shared.work.rename(&old, &new).await?;
        }

        self.shared.retrack_created(&old, &new);

        let entry = self.shared.local.open(&new).await?;
        if entry.is_dir {
            match self.shared.remote.rename(&old, &new).await {
                Ok(()) => {}
                Err(TreeError::NotFound(_)) => {
                    warn!(old = %old, new = %new, "directory missing on remote during rename");
                }
                Err(err) => return Err(err),
            }
            if let Err(err) = self.shared.queue.update_path(&old, &new).await {
                warn!(old = %old, new = %new, error = %err, "failed to re-parent queued requests");
            }
        } else {
            self.shared.queue_data(&old, Method::Move, Some(&new)).await;
        }

        Ok(())
    }

    /// Append a deferred mutation for a name. Exposed for the overlay
    /// file close hooks of external front ends.
    pub async fn queue_data(&self, name: &str, method: Method, dest_name: Option<&str>) {
        self.shared.queue_data(name, method, dest_name).await
    }

    /// Whether an orphaned local file may be auto-removed: no open client
    /// handle, no pending queue entry referring to it, and no creation
    /// marker.
    pub async fn can_delete(&self, entry: &TreeEntry) -> Result<bool> {
        if self.shared.is_open(&entry.path) {
            return Ok(false);
        }
        if self.shared.queue.has_entry_for(&entry.path).await? {
            return Ok(false);
        }
        if self.shared.work.exists(&marker_name(&entry.path)).await? {
            return Ok(false);
        }
        Ok(true)
    }
}
