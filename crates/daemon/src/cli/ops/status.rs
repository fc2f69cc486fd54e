use std::fmt;

use clap::Args;
use comfy_table::Table;
use owo_colors::OwoColorize;

use crate::cli::op::{Op, OpContext};
use crate::http_server::api::v0::cache_stats::CacheStatsResponse;
use crate::http_server::api::v0::queue_stats::QueueStatsResponse;
use crate::state::{AppState, StateError};

/// Show queue and cache statistics of a running daemon.
#[derive(Args, Debug, Clone)]
pub struct Status {}

#[derive(Debug)]
pub struct StatusOutput {
    queue: QueueStatsResponse,
    cache: CacheStatsResponse,
}

impl fmt::Display for StatusOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {}",
            "Share".bold(),
            self.queue.share_id.to_string().dimmed()
        )?;

        let mut table = Table::new();
        table.set_header(vec!["metric", "value"]);
        table.add_row(vec![
            "queued requests".to_string(),
            self.queue.stats.pending.to_string(),
        ]);
        table.add_row(vec![
            "failed at least once".to_string(),
            self.queue.stats.failed.to_string(),
        ]);
        table.add_row(vec![
            "parents with work".to_string(),
            self.queue.stats.parents.to_string(),
        ]);
        table.add_row(vec![
            "cached files".to_string(),
            self.cache.stats.content_count.to_string(),
        ]);
        table.add_row(vec![
            "cached listings".to_string(),
            self.cache.stats.listing_count.to_string(),
        ]);
        write!(f, "{}", table)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("{0}")]
    State(#[from] StateError),

    #[error("cannot reach daemon: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait::async_trait]
impl Op for Status {
    type Error = StatusError;
    type Output = StatusOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.cirrus_dir.clone())?;
        let base = format!("http://127.0.0.1:{}", state.config.api_port);
        let client = reqwest::Client::new();

        let queue: QueueStatsResponse = client
            .get(format!("{}/api/v0/queue/stats", base))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let cache: CacheStatsResponse = client
            .get(format!("{}/api/v0/cache/stats", base))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(StatusOutput { queue, cache })
    }
}
