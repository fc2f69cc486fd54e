//! Tree collaborator contracts.
//!
//! The overlay composes three trees addressed by logical name: the local
//! cache (L), the sidecar work tree (W), and the remote repository (R).
//! Local and work trees are plain filesystems; the remote is HTTP. The
//! overlay itself only depends on the traits here.

mod fs;
mod http;

pub use fs::FsTree;
pub use http::HttpTree;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::Result;

/// A resolved entry in some tree.
///
/// `path` is the logical name, `name` its final component. Deleting an
/// entry goes through [`Tree::delete`] rather than the handle itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
}

impl TreeEntry {
    pub fn new(path: impl Into<String>, is_dir: bool) -> Self {
        let path = crate::path::normalize(&path.into());
        Self {
            name: crate::path::basename(&path).to_string(),
            path,
            is_dir,
        }
    }
}

/// Asynchronous tree surface shared by local, work, and remote trees.
///
/// `list` takes a pattern whose final component may contain `*`
/// wildcards (e.g. `/a/*`); all other operations take exact logical
/// names.
#[async_trait]
pub trait Tree: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool>;

    async fn open(&self, name: &str) -> Result<TreeEntry>;

    async fn list(&self, pattern: &str) -> Result<Vec<TreeEntry>>;

    /// Create an empty file. Fails with `AlreadyExists` when present.
    async fn create_file(&self, name: &str) -> Result<TreeEntry>;

    /// Create a directory. Fails with `AlreadyExists` when present.
    async fn create_directory(&self, name: &str) -> Result<TreeEntry>;

    async fn delete(&self, name: &str) -> Result<()>;

    /// Delete a directory and everything below it.
    async fn delete_directory(&self, name: &str) -> Result<()>;

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()>;
}

/// The remote repository: the tree surface plus the pieces the sync
/// processor needs to replay queued mutations.
#[async_trait]
pub trait RemoteTree: Tree {
    /// Absolute URL of a logical name under this remote.
    fn build_resource_url(&self, name: &str) -> Result<Url>;

    /// Upload file bytes to a logical name, creating or replacing it.
    async fn upload(&self, name: &str, body: Bytes) -> Result<()>;
}
