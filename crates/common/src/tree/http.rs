//! HTTP remote tree adapter.
//!
//! Speaks the content repository's plain HTTP surface: HEAD for
//! existence and metadata, `GET ?list=` for JSON directory listings, PUT
//! for uploads and directory creation, DELETE, and POST with a
//! destination header for moves. Directories are flagged with the
//! `X-Cirrus-Directory` header in both directions.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{RemoteTree, Tree, TreeEntry};
use crate::error::{Result, TreeError};
use crate::path;

const DIRECTORY_HEADER: &str = "x-cirrus-directory";
const MOVE_HEADER: &str = "x-move-destination";

/// One entry of a remote directory listing.
#[derive(Debug, Clone, Deserialize)]
struct RemoteListing {
    name: String,
    #[serde(default)]
    dir: bool,
}

/// Remote repository accessed over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTree {
    base: Url,
    client: Client,
}

impl HttpTree {
    /// Create an adapter for the repository rooted at `base`.
    pub fn new(base: &Url) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Accept", HeaderValue::from_static("application/json"));
        let client = Client::builder().default_headers(default_headers).build()?;

        // Url::join treats a base without a trailing slash as a file.
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }

        Ok(Self { base, client })
    }

    fn url_for(&self, name: &str) -> Result<Url> {
        let relative = path::normalize(name);
        self.base
            .join(relative.trim_start_matches('/'))
            .map_err(|e| TreeError::Remote {
                status: None,
                message: format!("cannot build URL for {}: {}", relative, e),
            })
    }

    async fn head(&self, name: &str) -> Result<Option<Response>> {
        let response = self.client.head(self.url_for(name)?).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response)),
            status => Err(status_error(status, name)),
        }
    }
}

#[async_trait]
impl Tree for HttpTree {
    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.head(name).await?.is_some())
    }

    async fn open(&self, name: &str) -> Result<TreeEntry> {
        let response = self
            .head(name)
            .await?
            .ok_or_else(|| TreeError::NotFound(path::normalize(name)))?;

        let is_dir = response.headers().contains_key(DIRECTORY_HEADER);
        Ok(TreeEntry::new(name, is_dir))
    }

    async fn list(&self, pattern: &str) -> Result<Vec<TreeEntry>> {
        let parent = path::parent(pattern);
        let leaf = path::basename(pattern).to_string();

        let mut url = self.url_for(&parent)?;
        url.query_pairs_mut().append_pair("list", &leaf);

        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(TreeError::NotFound(parent)),
            status if status.is_success() => {
                let listing: Vec<RemoteListing> = response.json().await?;
                Ok(listing
                    .into_iter()
                    .map(|e| TreeEntry::new(path::join(&parent, &e.name), e.dir))
                    .collect())
            }
            status => Err(status_error(status, &parent)),
        }
    }

    async fn create_file(&self, name: &str) -> Result<TreeEntry> {
        self.upload(name, Bytes::new()).await?;
        Ok(TreeEntry::new(name, false))
    }

    async fn create_directory(&self, name: &str) -> Result<TreeEntry> {
        let response = self
            .client
            .put(self.url_for(name)?)
            .header(DIRECTORY_HEADER, "1")
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT => Err(TreeError::AlreadyExists(path::normalize(name))),
            status if status.is_success() => {
                debug!(path = %name, "remote directory created");
                Ok(TreeEntry::new(name, true))
            }
            status => Err(status_error(status, name)),
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let response = self.client.delete(self.url_for(name)?).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(TreeError::NotFound(path::normalize(name))),
            status if status.is_success() => Ok(()),
            status => Err(status_error(status, name)),
        }
    }

    async fn delete_directory(&self, name: &str) -> Result<()> {
        let response = self.client.delete(self.url_for(name)?).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(TreeError::NotFound(path::normalize(name))),
            StatusCode::CONFLICT => Err(TreeError::NotEmpty(path::normalize(name))),
            status if status.is_success() => Ok(()),
            status => Err(status_error(status, name)),
        }
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url_for(old_name)?)
            .header(MOVE_HEADER, path::normalize(new_name))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(TreeError::NotFound(path::normalize(old_name))),
            status if status.is_success() => Ok(()),
            status => Err(status_error(status, old_name)),
        }
    }
}

#[async_trait]
impl RemoteTree for HttpTree {
    fn build_resource_url(&self, name: &str) -> Result<Url> {
        self.url_for(name)
    }

    async fn upload(&self, name: &str, body: Bytes) -> Result<()> {
        let response = self
            .client
            .put(self.url_for(name)?)
            .body(body)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                debug!(path = %name, "uploaded");
                Ok(())
            }
            status => Err(status_error(status, name)),
        }
    }
}

fn status_error(status: StatusCode, name: &str) -> TreeError {
    TreeError::Remote {
        status: Some(status.as_u16()),
        message: format!("{} for {}", status, path::normalize(name)),
    }
}
