//! Share surface: configuration, temp-name predicate, content cache, and
//! resource URLs.
//!
//! A share ties together the three tree roots and the cross-cutting state
//! the overlay needs: which names are temporary, what has been cached,
//! and where events go.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{Result, TreeError};
use crate::events::EventSender;
use crate::path;

/// Content cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentCacheConfig {
    /// Maximum cached entries across content and listings.
    pub max_entries: u64,
    /// TTL for cached content in seconds.
    pub ttl_secs: u64,
}

impl Default for ContentCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_secs: 300,
        }
    }
}

/// Share configuration, as loaded from the daemon config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    /// Share identity, used in logs and the admin API.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Root of the local content tree (L).
    pub local_path: std::path::PathBuf,
    /// Root of the sidecar work tree (W).
    pub work_path: std::path::PathBuf,
    /// Remote repository root (R).
    pub remote_prefix: Url,
    /// Regexes matched against basenames; matching names are temporary
    /// and never queued.
    #[serde(default = "default_temp_patterns")]
    pub temp_patterns: Vec<String>,
    #[serde(default)]
    pub cache: ContentCacheConfig,
}

fn default_temp_patterns() -> Vec<String> {
    vec![
        "^~".to_string(),
        r"^\.smbdelete".to_string(),
        r"\.tmp$".to_string(),
    ]
}

/// Cached file bytes keyed by logical name, plus directory listings.
///
/// Invalidation is per-key; moka cannot enumerate by prefix, so a
/// recursive invalidation flushes everything (same trade-off as the FUSE
/// file cache this is modeled on).
#[derive(Clone)]
pub struct ContentCache {
    content: Cache<String, Arc<Vec<u8>>>,
    listings: Cache<String, Arc<Vec<String>>>,
}

impl ContentCache {
    pub fn new(config: &ContentCacheConfig) -> Self {
        let ttl = Duration::from_secs(config.ttl_secs);
        Self {
            content: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(config.max_entries)
                .build(),
            listings: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(config.max_entries)
                .build(),
        }
    }

    pub fn get_content(&self, name: &str) -> Option<Arc<Vec<u8>>> {
        self.content.get(&path::normalize(name))
    }

    pub fn put_content(&self, name: &str, bytes: Arc<Vec<u8>>) {
        self.content.insert(path::normalize(name), bytes);
    }

    pub fn get_listing(&self, parent: &str) -> Option<Arc<Vec<String>>> {
        self.listings.get(&path::normalize(parent))
    }

    pub fn put_listing(&self, parent: &str, names: Arc<Vec<String>>) {
        self.listings.insert(path::normalize(parent), names);
    }

    /// Drop the listing for `parent` and, when `recursive`, everything.
    pub fn invalidate_parent(&self, parent: &str, recursive: bool) {
        let key = path::normalize(parent);
        self.listings.invalidate(&key);
        self.content.invalidate(&key);
        if recursive {
            self.invalidate_all();
        }
    }

    pub fn invalidate(&self, name: &str) {
        let key = path::normalize(name);
        self.content.invalidate(&key);
        self.listings.invalidate(&key);
    }

    pub fn invalidate_all(&self) {
        self.content.invalidate_all();
        self.listings.invalidate_all();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            content_count: self.content.entry_count(),
            listing_count: self.listings.entry_count(),
        }
    }
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("content_count", &self.content.entry_count())
            .field("listing_count", &self.listings.entry_count())
            .finish()
    }
}

/// Cache counters for the admin API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub content_count: u64,
    pub listing_count: u64,
}

/// A configured share.
#[derive(Debug, Clone)]
pub struct Share {
    config: ShareConfig,
    temp: RegexSet,
    cache: ContentCache,
    events: EventSender,
}

impl Share {
    pub fn new(config: ShareConfig) -> Result<Self> {
        let temp = RegexSet::new(&config.temp_patterns).map_err(|e| {
            TreeError::Io(std::io::Error::other(format!(
                "invalid temp pattern: {}",
                e
            )))
        })?;
        let cache = ContentCache::new(&config.cache);

        Ok(Self {
            config,
            temp,
            cache,
            events: EventSender::default(),
        })
    }

    pub fn config(&self) -> &ShareConfig {
        &self.config
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    /// Whether a logical name matches the temp-file predicate.
    /// Deterministic and side-effect-free; only the basename is tested.
    pub fn is_temp_name(&self, name: &str) -> bool {
        self.temp.is_match(path::basename(name))
    }

    /// Invalidate cached state under a parent directory.
    pub fn invalidate_content_cache(&self, parent: &str, recursive: bool) {
        self.cache.invalidate_parent(parent, recursive);
    }

    /// Absolute URL of a logical name under the remote prefix.
    pub fn build_resource_url(&self, name: &str) -> Result<Url> {
        let mut base = self.config.remote_prefix.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        base.join(path::normalize(name).trim_start_matches('/'))
            .map_err(|e| TreeError::Remote {
                status: None,
                message: format!("cannot build URL for {}: {}", name, e),
            })
    }
}
