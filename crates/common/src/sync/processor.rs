//! The sync processor drains the durable request queue against the
//! remote repository.
//!
//! Entries replay FIFO within a parent directory; across parents the
//! processor runs a bounded number of parents concurrently. A MOVE whose
//! destination lies in another parent locks both, so renames serialize
//! against both sides. Failures never reach clients; they surface as
//! [`ShareEvent`]s and, past the retry limit, as purged entries.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Result, TreeError};
use crate::events::{EventSender, ShareEvent};
use crate::overlay::marker_name;
use crate::path;
use crate::queue::{Method, QueueEntry, RequestQueue, StoredEntry};
use crate::tree::{FsTree, RemoteTree, Tree};

/// Sync processor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Parent directories drained concurrently.
    pub concurrency: usize,
    /// Failed attempts after which a permanently failing entry is purged.
    pub retry_limit: u32,
    /// In-pass retries for transient (transport/5xx) failures.
    pub transient_retries: u32,
    /// Base backoff delay in milliseconds, doubled per retry.
    pub backoff_base_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub backoff_cap_ms: u64,
    /// Idle delay between drain passes in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry_limit: 5,
            transient_retries: 3,
            backoff_base_ms: 250,
            backoff_cap_ms: 5_000,
            poll_interval_ms: 1_000,
        }
    }
}

/// Background drainer of the request queue.
pub struct SyncProcessor<R, Q> {
    remote: Arc<R>,
    queue: Arc<Q>,
    work: FsTree,
    events: EventSender,
    config: SyncConfig,
    shutdown: Option<watch::Receiver<()>>,
}

impl<R, Q> Clone for SyncProcessor<R, Q> {
    fn clone(&self) -> Self {
        Self {
            remote: self.remote.clone(),
            queue: self.queue.clone(),
            work: self.work.clone(),
            events: self.events.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<R, Q> SyncProcessor<R, Q>
where
    R: RemoteTree + Send + Sync + 'static,
    Q: RequestQueue + 'static,
{
    /// The processor receives the collaborators it needs rather than the
    /// overlay tree itself.
    pub fn new(
        remote: Arc<R>,
        queue: Arc<Q>,
        work: FsTree,
        events: EventSender,
        config: SyncConfig,
    ) -> Self {
        Self {
            remote,
            queue,
            work,
            events,
            config,
            shutdown: None,
        }
    }

    /// Run until the shutdown channel fires. Stops at entry boundaries,
    /// never mid-entry.
    pub async fn run(mut self, mut shutdown: watch::Receiver<()>) {
        info!("sync processor started");
        self.shutdown = Some(shutdown.clone());

        loop {
            if let Err(err) = self.drain_once().await {
                warn!(error = %err, "drain pass failed");
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)) => {}
            }
        }

        info!("sync processor stopped");
    }

    /// Spawn the processor onto the runtime.
    pub fn spawn(self, shutdown: watch::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Drain everything currently pending, in waves of parents with
    /// disjoint lock sets. Returns once the queue is empty or no wave
    /// makes progress (entries are stuck waiting on retries).
    pub async fn drain_once(&self) -> Result<()> {
        loop {
            let parents = self.queue.pending_parents().await?;
            if parents.is_empty() {
                return Ok(());
            }

            let mut busy: HashSet<String> = HashSet::new();
            let mut wave: Vec<(String, Vec<StoredEntry>)> = Vec::new();
            for parent in parents {
                if wave.len() >= self.config.concurrency {
                    break;
                }

                let entries = self.queue.entries_for(&parent).await?;
                if entries.is_empty() {
                    continue;
                }

                // A move locks its destination parent as well as its own.
                let mut locks: HashSet<String> = HashSet::new();
                locks.insert(parent.clone());
                for stored in &entries {
                    if let Some(dest) = &stored.entry.dest_path {
                        locks.insert(path::parent(dest));
                    }
                }
                if locks.iter().any(|l| busy.contains(l)) {
                    continue;
                }

                busy.extend(locks);
                wave.push((parent, entries));
            }

            if wave.is_empty() {
                return Ok(());
            }

            let mut progressed = false;
            let mut workers = JoinSet::new();
            for (parent, entries) in wave {
                let worker = self.clone();
                workers.spawn(async move { worker.drain_parent(parent, entries).await });
            }
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(completed) => progressed |= completed > 0,
                    Err(err) => warn!(error = %err, "drain worker panicked"),
                }
            }

            if !progressed {
                return Ok(());
            }
        }
    }

    fn stopping(&self) -> bool {
        match &self.shutdown {
            Some(rx) => rx.has_changed().unwrap_or(true),
            None => false,
        }
    }

    /// Replay one parent's entries in FIFO order. Returns the number of
    /// completed entries.
    async fn drain_parent(&self, parent: String, entries: Vec<StoredEntry>) -> usize {
        self.events.emit(ShareEvent::SyncStart {
            parent: parent.clone(),
        });

        let mut completed = 0usize;
        let mut purged: Vec<QueueEntry> = Vec::new();

        for stored in entries {
            if self.stopping() {
                break;
            }

            let outcome = self.replay_with_backoff(&stored.entry).await;
            match outcome {
                Ok(()) => {
                    if let Err(err) = self.queue.complete(stored.id).await {
                        warn!(id = stored.id, error = %err, "failed to remove completed entry");
                        break;
                    }
                    debug!(method = %stored.entry.method, path = %stored.entry.path, "replayed");
                    completed += 1;
                }
                Err(err) => {
                    self.events.emit(ShareEvent::SyncError {
                        path: stored.entry.path.clone(),
                        message: err.to_string(),
                    });

                    let attempts = match self.queue.fail(stored.id, &err.to_string()).await {
                        Ok(n) => n,
                        Err(queue_err) => {
                            warn!(id = stored.id, error = %queue_err, "failed to record attempt");
                            break;
                        }
                    };

                    let permanent = !err.is_transient();
                    if permanent && attempts >= self.config.retry_limit {
                        warn!(
                            method = %stored.entry.method,
                            path = %stored.entry.path,
                            attempts,
                            "purging entry after repeated permanent failures"
                        );
                        if self.queue.complete(stored.id).await.is_ok() {
                            purged.push(stored.entry);
                            // The failed entry is gone; later entries for
                            // this parent may proceed.
                            continue;
                        }
                    }

                    // Preserve FIFO: nothing later in this parent replays
                    // past a still-queued failure.
                    break;
                }
            }
        }

        if !purged.is_empty() {
            self.events.emit(ShareEvent::Purged { entries: purged });
        }
        self.events.emit(ShareEvent::SyncEnd {
            parent,
            completed,
        });

        completed
    }

    /// Replay one entry, absorbing transient failures with capped
    /// exponential backoff.
    async fn replay_with_backoff(&self, entry: &QueueEntry) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match self.replay_once(entry).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.config.transient_retries => {
                    let delay = backoff_delay(
                        attempt,
                        self.config.backoff_base_ms,
                        self.config.backoff_cap_ms,
                    );
                    debug!(
                        path = %entry.path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn replay_once(&self, entry: &QueueEntry) -> Result<()> {
        match entry.method {
            Method::Put | Method::Post => {
                let bytes = read_local(&entry.local_prefix, &entry.path).await?;
                self.remote.upload(&entry.path, bytes).await?;
                self.clear_marker(&entry.path).await;
                Ok(())
            }
            Method::Delete => match self.remote.delete(&entry.path).await {
                // Already gone remotely counts as done.
                Ok(()) | Err(TreeError::NotFound(_)) => Ok(()),
                Err(err) if err.remote_status() == Some(404) => Ok(()),
                Err(err) => Err(err),
            },
            Method::Move => {
                let dest = entry.dest_path.as_deref().ok_or_else(|| {
                    TreeError::Queue(format!("MOVE entry for {} lacks a destination", entry.path))
                })?;

                match self.remote.rename(&entry.path, dest).await {
                    Ok(()) => {
                        self.clear_marker(dest).await;
                        Ok(())
                    }
                    Err(err)
                        if matches!(err, TreeError::NotFound(_))
                            || err.remote_status() == Some(404) =>
                    {
                        // The source never reached the remote (a
                        // client-created or temp file renamed before its
                        // upload); the destination bytes are local.
                        let bytes = read_local(&entry.local_prefix, dest).await?;
                        self.remote.upload(dest, bytes).await?;
                        self.clear_marker(dest).await;
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// Drop the creation marker once the remote has confirmed the bytes.
    async fn clear_marker(&self, name: &str) {
        match self.work.delete(&marker_name(name)).await {
            Ok(()) => debug!(path = %name, "creation marker cleared"),
            Err(TreeError::NotFound(_)) => {}
            Err(err) => warn!(path = %name, error = %err, "failed to clear creation marker"),
        }
    }
}

async fn read_local(local_prefix: &str, name: &str) -> Result<Bytes> {
    let fs_path = PathBuf::from(local_prefix).join(path::normalize(name).trim_start_matches('/'));
    match tokio::fs::read(&fs_path).await {
        Ok(bytes) => Ok(Bytes::from(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(TreeError::NotFound(path::normalize(name)))
        }
        Err(err) => Err(TreeError::Io(err)),
    }
}

fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let factor = 1u64 << attempt.min(16);
    Duration::from_millis(base_ms.saturating_mul(factor).min(cap_ms))
}
