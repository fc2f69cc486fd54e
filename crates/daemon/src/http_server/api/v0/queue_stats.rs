//! Queue stats API endpoint

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{QueueStats, RequestQueue};

use crate::process::ServiceState;

/// Response containing request-queue statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatsResponse {
    pub share_id: Uuid,
    pub stats: QueueStats,
}

pub async fn handler(
    State(state): State<ServiceState>,
) -> Result<impl IntoResponse, QueueStatsError> {
    let stats = state
        .queue()
        .stats()
        .await
        .map_err(|e| QueueStatsError::Unavailable(e.to_string()))?;

    Ok((
        http::StatusCode::OK,
        Json(QueueStatsResponse {
            share_id: state.share().config().id,
            stats,
        }),
    )
        .into_response())
}

#[derive(Debug, thiserror::Error)]
pub enum QueueStatsError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

impl IntoResponse for QueueStatsError {
    fn into_response(self) -> Response {
        match self {
            QueueStatsError::Unavailable(msg) => (
                http::StatusCode::SERVICE_UNAVAILABLE,
                format!("Request queue not available: {}", msg),
            )
                .into_response(),
        }
    }
}
