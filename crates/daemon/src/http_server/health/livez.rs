use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::process::ServiceState;

/// Liveness payload: which share this daemon serves, and that it is
/// responding at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivezResponse {
    pub status: String,
    pub share_id: Uuid,
}

/// Liveness probe. Answers as long as the process is up; supervisors
/// restart the daemon when this stops responding. The share id lets a
/// probe distinguish daemons on a multi-share host.
pub async fn handler(State(state): State<ServiceState>) -> Response {
    (
        StatusCode::OK,
        Json(LivezResponse {
            status: "alive".to_string(),
            share_id: state.share().config().id,
        }),
    )
        .into_response()
}
