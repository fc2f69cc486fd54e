//! Shared test environment: real filesystem trees and queue, in-memory
//! remote double.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use url::Url;

use ::common::{
    FsTree, OverlayTree, RemoteTree, Result, Share, ShareConfig, SqliteQueue, Tree, TreeEntry,
    TreeError,
};

/// In-memory remote repository with scriptable failures.
#[derive(Debug)]
pub struct MemoryRemote {
    base: Url,
    /// path → is_dir; BTreeMap keeps listing order stable.
    nodes: Mutex<BTreeMap<String, bool>>,
    contents: Mutex<HashMap<String, Bytes>>,
    /// Per-path statuses returned by upcoming uploads, consumed front to
    /// back.
    upload_failures: Mutex<HashMap<String, Vec<u16>>>,
    /// Per-path statuses returned by upcoming deletes, consumed front to
    /// back.
    delete_failures: Mutex<HashMap<String, Vec<u16>>>,
    /// Operations performed, in order, e.g. "PUT /a/x.txt".
    pub ops: Mutex<Vec<String>>,
    pub upload_count: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            base: Url::parse("http://repo.test/share/").unwrap(),
            nodes: Mutex::new(BTreeMap::new()),
            contents: Mutex::new(HashMap::new()),
            upload_failures: Mutex::new(HashMap::new()),
            delete_failures: Mutex::new(HashMap::new()),
            ops: Mutex::new(Vec::new()),
            upload_count: AtomicUsize::new(0),
        }
    }

    /// Seed a file (and its parent directories) on the remote.
    pub fn seed_file(&self, path: &str, bytes: &[u8]) {
        let path = ::common::path::normalize(path);
        self.seed_parents(&path);
        self.nodes.lock().unwrap().insert(path.clone(), false);
        self.contents
            .lock()
            .unwrap()
            .insert(path, Bytes::copy_from_slice(bytes));
    }

    pub fn seed_dir(&self, path: &str) {
        let path = ::common::path::normalize(path);
        self.seed_parents(&path);
        self.nodes.lock().unwrap().insert(path, true);
    }

    fn seed_parents(&self, path: &str) {
        let mut nodes = self.nodes.lock().unwrap();
        let mut dir = ::common::path::parent(path);
        while dir != "/" {
            nodes.insert(dir.clone(), true);
            dir = ::common::path::parent(&dir);
        }
    }

    pub fn content(&self, path: &str) -> Option<Bytes> {
        self.contents
            .lock()
            .unwrap()
            .get(&::common::path::normalize(path))
            .cloned()
    }

    pub fn has(&self, path: &str) -> bool {
        self.nodes
            .lock()
            .unwrap()
            .contains_key(&::common::path::normalize(path))
    }

    /// Make the next uploads of a path fail with the given statuses.
    pub fn fail_uploads(&self, path: &str, statuses: &[u16]) {
        self.upload_failures
            .lock()
            .unwrap()
            .insert(::common::path::normalize(path), statuses.to_vec());
    }

    /// Make the next deletes of a path fail with the given statuses.
    pub fn fail_deletes(&self, path: &str, statuses: &[u16]) {
        self.delete_failures
            .lock()
            .unwrap()
            .insert(::common::path::normalize(path), statuses.to_vec());
    }

    pub fn recorded_ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }

    fn pop_failure(failures: &Mutex<HashMap<String, Vec<u16>>>, path: &str) -> Option<u16> {
        let mut failures = failures.lock().unwrap();
        let statuses = failures.get_mut(path)?;
        if statuses.is_empty() {
            None
        } else {
            Some(statuses.remove(0))
        }
    }

    fn leaf_matches(leaf: &str, name: &str) -> bool {
        if leaf == "*" {
            return true;
        }
        if let Some(suffix) = leaf.strip_prefix('*') {
            return name.ends_with(suffix);
        }
        leaf == name
    }
}

#[async_trait]
impl Tree for MemoryRemote {
    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.has(name))
    }

    async fn open(&self, name: &str) -> Result<TreeEntry> {
        let name = ::common::path::normalize(name);
        let nodes = self.nodes.lock().unwrap();
        match nodes.get(&name) {
            Some(&is_dir) => Ok(TreeEntry::new(name.clone(), is_dir)),
            None => Err(TreeError::NotFound(name)),
        }
    }

    async fn list(&self, pattern: &str) -> Result<Vec<TreeEntry>> {
        let parent = ::common::path::parent(pattern);
        let leaf = ::common::path::basename(pattern).to_string();

        let nodes = self.nodes.lock().unwrap();
        if parent != "/" && !nodes.contains_key(&parent) {
            return Err(TreeError::NotFound(parent));
        }

        Ok(nodes
            .iter()
            .filter(|(path, _)| ::common::path::parent(path) == parent)
            .filter(|(path, _)| Self::leaf_matches(&leaf, ::common::path::basename(path)))
            .map(|(path, &is_dir)| TreeEntry::new(path.clone(), is_dir))
            .collect())
    }

    async fn create_file(&self, name: &str) -> Result<TreeEntry> {
        let name = ::common::path::normalize(name);
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(&name) {
            return Err(TreeError::AlreadyExists(name));
        }
        nodes.insert(name.clone(), false);
        Ok(TreeEntry::new(name, false))
    }

    async fn create_directory(&self, name: &str) -> Result<TreeEntry> {
        let name = ::common::path::normalize(name);
        self.record(format!("MKDIR {}", name));
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(&name) {
            return Err(TreeError::AlreadyExists(name));
        }
        nodes.insert(name.clone(), true);
        Ok(TreeEntry::new(name, true))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let name = ::common::path::normalize(name);
        self.record(format!("DELETE {}", name));

        if let Some(status) = Self::pop_failure(&self.delete_failures, &name) {
            return Err(TreeError::Remote {
                status: Some(status),
                message: format!("scripted failure for {}", name),
            });
        }

        let mut nodes = self.nodes.lock().unwrap();
        if nodes.remove(&name).is_none() {
            return Err(TreeError::NotFound(name));
        }
        self.contents.lock().unwrap().remove(&name);
        Ok(())
    }

    async fn delete_directory(&self, name: &str) -> Result<()> {
        let name = ::common::path::normalize(name);
        self.record(format!("RMDIR {}", name));
        let mut nodes = self.nodes.lock().unwrap();
        if !nodes.contains_key(&name) {
            return Err(TreeError::NotFound(name));
        }
        nodes.retain(|path, _| !::common::path::starts_with(path, &name));
        self.contents
            .lock()
            .unwrap()
            .retain(|path, _| !::common::path::starts_with(path, &name));
        Ok(())
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let old = ::common::path::normalize(old_name);
        let new = ::common::path::normalize(new_name);
        self.record(format!("MOVE {} -> {}", old, new));

        let mut nodes = self.nodes.lock().unwrap();
        if !nodes.contains_key(&old) {
            return Err(TreeError::NotFound(old));
        }

        let moved: Vec<(String, bool)> = nodes
            .iter()
            .filter(|(path, _)| ::common::path::starts_with(path, &old))
            .map(|(path, &is_dir)| (path.clone(), is_dir))
            .collect();
        for (path, is_dir) in moved {
            nodes.remove(&path);
            if let Some(rebased) = ::common::path::rebase(&path, &old, &new) {
                nodes.insert(rebased, is_dir);
            }
        }

        let mut contents = self.contents.lock().unwrap();
        let moved_contents: Vec<String> = contents
            .keys()
            .filter(|path| ::common::path::starts_with(path, &old))
            .cloned()
            .collect();
        for path in moved_contents {
            if let (Some(bytes), Some(rebased)) = (
                contents.remove(&path),
                ::common::path::rebase(&path, &old, &new),
            ) {
                contents.insert(rebased, bytes);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl RemoteTree for MemoryRemote {
    fn build_resource_url(&self, name: &str) -> Result<Url> {
        self.base
            .join(::common::path::normalize(name).trim_start_matches('/'))
            .map_err(|e| TreeError::Remote {
                status: None,
                message: e.to_string(),
            })
    }

    async fn upload(&self, name: &str, body: Bytes) -> Result<()> {
        let name = ::common::path::normalize(name);
        self.record(format!("PUT {}", name));

        if let Some(status) = Self::pop_failure(&self.upload_failures, &name) {
            return Err(TreeError::Remote {
                status: Some(status),
                message: format!("scripted failure for {}", name),
            });
        }

        self.upload_count.fetch_add(1, Ordering::SeqCst);
        self.seed_parents(&name);
        self.nodes.lock().unwrap().insert(name.clone(), false);
        self.contents.lock().unwrap().insert(name, body);
        Ok(())
    }
}

/// A full overlay environment on disk.
pub struct TestEnv {
    pub share: Arc<Share>,
    pub overlay: OverlayTree<MemoryRemote, SqliteQueue>,
    pub remote: Arc<MemoryRemote>,
    pub queue: Arc<SqliteQueue>,
    pub local: FsTree,
    pub work: FsTree,
    pub temp: TempDir,
}

pub async fn setup() -> TestEnv {
    let temp = TempDir::new().unwrap();
    let local_path = temp.path().join("local");
    let work_path = temp.path().join("work");

    let share = Arc::new(
        Share::new(ShareConfig {
            id: uuid::Uuid::new_v4(),
            local_path: local_path.clone(),
            work_path: work_path.clone(),
            remote_prefix: Url::parse("http://repo.test/share").unwrap(),
            temp_patterns: vec!["^~".to_string(), r"^\.smbdelete".to_string()],
            cache: Default::default(),
        })
        .unwrap(),
    );

    let remote = Arc::new(MemoryRemote::new());
    let queue = Arc::new(SqliteQueue::in_memory().await.unwrap());
    let overlay = OverlayTree::new(share.clone(), remote.clone(), queue.clone()).unwrap();

    TestEnv {
        share,
        overlay,
        remote,
        queue,
        local: FsTree::new(local_path).unwrap(),
        work: FsTree::new(work_path).unwrap(),
        temp,
    }
}
