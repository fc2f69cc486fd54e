//! Root-anchored posix tree.
//!
//! Serves both the local cache (L) and the sidecar work tree (W). All
//! operations resolve logical names under a fixed root directory; the
//! root itself always exists once the tree is constructed.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use tokio::fs;
use tracing::debug;

use super::{Tree, TreeEntry};
use crate::error::{Result, TreeError};
use crate::path;

/// Async filesystem tree rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsTree {
    root: PathBuf,
}

impl FsTree {
    /// Create a tree rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute filesystem path of a logical name.
    pub fn resolve(&self, name: &str) -> PathBuf {
        let normalized = path::normalize(name);
        self.root.join(normalized.trim_start_matches('/'))
    }

    async fn entry_at(&self, name: &str) -> Result<TreeEntry> {
        let fs_path = self.resolve(name);
        let meta = fs::metadata(&fs_path)
            .await
            .map_err(|e| not_found_or_io(e, name))?;
        Ok(TreeEntry::new(name, meta.is_dir()))
    }
}

#[async_trait]
impl Tree for FsTree {
    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(fs::try_exists(self.resolve(name)).await?)
    }

    async fn open(&self, name: &str) -> Result<TreeEntry> {
        self.entry_at(name).await
    }

    async fn list(&self, pattern: &str) -> Result<Vec<TreeEntry>> {
        let parent = path::parent(pattern);
        let leaf = leaf_matcher(path::basename(pattern))?;

        let dir_path = self.resolve(&parent);
        let mut reader = fs::read_dir(&dir_path)
            .await
            .map_err(|e| not_found_or_io(e, &parent))?;

        let mut entries = Vec::new();
        while let Some(dirent) = reader.next_entry().await? {
            let file_name = dirent.file_name().to_string_lossy().to_string();
            if !leaf.is_match(&file_name) {
                continue;
            }
            let file_type = dirent.file_type().await?;
            entries.push(TreeEntry::new(
                path::join(&parent, &file_name),
                file_type.is_dir(),
            ));
        }

        // read_dir order is platform-dependent; pin it down.
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn create_file(&self, name: &str) -> Result<TreeEntry> {
        let fs_path = self.resolve(name);
        if let Some(dir) = fs_path.parent() {
            fs::create_dir_all(dir).await?;
        }

        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&fs_path)
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    TreeError::AlreadyExists(path::normalize(name))
                } else {
                    TreeError::Io(e)
                }
            })?;

        debug!(path = %name, "file created");
        Ok(TreeEntry::new(name, false))
    }

    async fn create_directory(&self, name: &str) -> Result<TreeEntry> {
        let fs_path = self.resolve(name);
        if fs::try_exists(&fs_path).await? {
            return Err(TreeError::AlreadyExists(path::normalize(name)));
        }
        fs::create_dir_all(&fs_path).await?;

        debug!(path = %name, "directory created");
        Ok(TreeEntry::new(name, true))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        fs::remove_file(self.resolve(name))
            .await
            .map_err(|e| not_found_or_io(e, name))
    }

    async fn delete_directory(&self, name: &str) -> Result<()> {
        fs::remove_dir_all(self.resolve(name))
            .await
            .map_err(|e| not_found_or_io(e, name))
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let from = self.resolve(old_name);
        let to = self.resolve(new_name);
        if let Some(dir) = to.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::rename(&from, &to)
            .await
            .map_err(|e| not_found_or_io(e, old_name))
    }
}

fn not_found_or_io(err: std::io::Error, name: &str) -> TreeError {
    if err.kind() == ErrorKind::NotFound {
        TreeError::NotFound(path::normalize(name))
    } else {
        TreeError::Io(err)
    }
}

/// Compile the final pattern component (`*` wildcards only) to a matcher.
fn leaf_matcher(leaf: &str) -> Result<Regex> {
    let parts: Vec<String> = leaf.split('*').map(|p| regex::escape(p)).collect();
    let expr = format!("^{}$", parts.join(".*"));
    Regex::new(&expr).map_err(|e| TreeError::Io(std::io::Error::other(format!(
        "invalid list pattern {leaf:?}: {e}"
    ))))
}
