use clap::Args;

use crate::cli::op::{Op, OpContext};
use crate::process;
use crate::state::{AppState, StateError};

/// Run the daemon in the foreground until interrupted.
#[derive(Args, Debug, Clone)]
pub struct Run {}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("{0}")]
    State(#[from] StateError),

    #[error("service failed: {0}")]
    Service(String),
}

#[async_trait::async_trait]
impl Op for Run {
    type Error = RunError;
    type Output = &'static str;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.cirrus_dir.clone())?;

        process::start_service(state)
            .await
            .map_err(|e| RunError::Service(format!("{:#}", e)))?;

        Ok("daemon stopped")
    }
}
