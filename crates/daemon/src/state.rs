//! Application state: the cirrus directory, the config file, and the
//! paths derived from them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use common::{ShareConfig, SyncConfig};

const CONFIG_FILE: &str = "config.toml";
const QUEUE_DB_FILE: &str = "queue.db";

/// On-disk daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Admin API port.
    pub api_port: u16,
    /// The share served by this daemon.
    pub share: ShareConfig,
    /// Sync processor tuning.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Resolved application state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub cirrus_dir: PathBuf,
    pub config_path: PathBuf,
    pub queue_db_path: PathBuf,
    pub config: AppConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("cannot determine home directory; set CIRRUS_HOME")]
    NoHome,

    #[error("not initialized: {0} missing (run `cirrus init` first)")]
    NotInitialized(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl AppState {
    /// The cirrus directory: an explicit override, `$CIRRUS_HOME`, or
    /// `~/.cirrus`.
    pub fn cirrus_dir(override_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = override_path {
            return Ok(path);
        }
        if let Some(home) = std::env::var_os("CIRRUS_HOME") {
            return Ok(PathBuf::from(home));
        }
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".cirrus"))
            .ok_or(StateError::NoHome)
    }

    /// Initialize the cirrus directory: create the tree roots and write
    /// the config file. `config` defaults the share roots into the
    /// cirrus directory when they are relative.
    pub fn init(dir: Option<PathBuf>, mut config: AppConfig) -> Result<Self, StateError> {
        let cirrus_dir = Self::cirrus_dir(dir)?;
        std::fs::create_dir_all(&cirrus_dir)?;

        if config.share.local_path.is_relative() {
            config.share.local_path = cirrus_dir.join(&config.share.local_path);
        }
        if config.share.work_path.is_relative() {
            config.share.work_path = cirrus_dir.join(&config.share.work_path);
        }
        std::fs::create_dir_all(&config.share.local_path)?;
        std::fs::create_dir_all(&config.share.work_path)?;

        let config_path = cirrus_dir.join(CONFIG_FILE);
        std::fs::write(&config_path, toml::to_string_pretty(&config)?)?;

        Ok(Self {
            queue_db_path: cirrus_dir.join(QUEUE_DB_FILE),
            cirrus_dir,
            config_path,
            config,
        })
    }

    /// Load previously initialized state.
    pub fn load(dir: Option<PathBuf>) -> Result<Self, StateError> {
        let cirrus_dir = Self::cirrus_dir(dir)?;
        let config_path = cirrus_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(StateError::NotInitialized(config_path));
        }

        let config: AppConfig = toml::from_str(&std::fs::read_to_string(&config_path)?)?;

        Ok(Self {
            queue_db_path: cirrus_dir.join(QUEUE_DB_FILE),
            cirrus_dir,
            config_path,
            config,
        })
    }
}

/// A default share config rooted inside the cirrus directory.
pub fn default_share_config(remote_prefix: Url) -> ShareConfig {
    ShareConfig {
        id: uuid::Uuid::new_v4(),
        local_path: Path::new("local").to_path_buf(),
        work_path: Path::new("work").to_path_buf(),
        remote_prefix,
        temp_patterns: vec![
            "^~".to_string(),
            r"^\.smbdelete".to_string(),
            r"\.tmp$".to_string(),
        ],
        cache: Default::default(),
    }
}
