//! Cache stats API endpoint

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::CacheStats;

use crate::process::ServiceState;

/// Response containing content-cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    pub share_id: Uuid,
    pub stats: CacheStats,
}

pub async fn handler(State(state): State<ServiceState>) -> impl IntoResponse {
    (
        http::StatusCode::OK,
        Json(CacheStatsResponse {
            share_id: state.share().config().id,
            stats: state.share().cache().stats(),
        }),
    )
}
