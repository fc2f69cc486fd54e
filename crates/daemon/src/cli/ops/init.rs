use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;
use url::Url;

use common::SyncConfig;

use crate::cli::op::{Op, OpContext};
use crate::state::{default_share_config, AppConfig, AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Remote repository URL this share overlays
    pub remote: Url,

    /// Admin API port
    #[arg(long, default_value = "7040")]
    pub api_port: u16,

    /// Local content tree root (default: <cirrus-dir>/local)
    #[arg(long)]
    pub local_path: Option<PathBuf>,

    /// Sidecar work tree root (default: <cirrus-dir>/work)
    #[arg(long)]
    pub work_path: Option<PathBuf>,

    /// Additional temp-name patterns (regex against basenames)
    #[arg(long = "temp-pattern")]
    pub temp_patterns: Vec<String>,
}

#[derive(Debug)]
pub struct InitOutput {
    pub cirrus_dir: PathBuf,
    pub config_path: PathBuf,
    pub local_path: PathBuf,
    pub work_path: PathBuf,
    pub remote: Url,
    pub api_port: u16,
}

impl fmt::Display for InitOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} cirrus at {}",
            "Initialized".green().bold(),
            self.cirrus_dir.display().to_string().bold()
        )?;
        writeln!(f, "  {} {}", "Config:".dimmed(), self.config_path.display())?;
        writeln!(f, "  {} {}", "Local:".dimmed(), self.local_path.display())?;
        writeln!(f, "  {} {}", "Work:".dimmed(), self.work_path.display())?;
        writeln!(f, "  {} {}", "Remote:".dimmed(), self.remote)?;
        write!(f, "  {} {}", "API port:".dimmed(), self.api_port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

#[async_trait::async_trait]
impl Op for Init {
    type Error = InitError;
    type Output = InitOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let mut share = default_share_config(self.remote.clone());
        if let Some(path) = &self.local_path {
            if !path.is_absolute() {
                return Err(InitError::InvalidPath(
                    "--local-path must be an absolute path".to_string(),
                ));
            }
            share.local_path = path.clone();
        }
        if let Some(path) = &self.work_path {
            if !path.is_absolute() {
                return Err(InitError::InvalidPath(
                    "--work-path must be an absolute path".to_string(),
                ));
            }
            share.work_path = path.clone();
        }
        share.temp_patterns.extend(self.temp_patterns.clone());

        let config = AppConfig {
            api_port: self.api_port,
            share,
            sync: SyncConfig::default(),
        };

        let state = AppState::init(ctx.cirrus_dir.clone(), config)?;

        Ok(InitOutput {
            cirrus_dir: state.cirrus_dir,
            config_path: state.config_path,
            local_path: state.config.share.local_path,
            work_path: state.config.share.work_path,
            remote: state.config.share.remote_prefix,
            api_port: state.config.api_port,
        })
    }
}
