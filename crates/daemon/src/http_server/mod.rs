//! Admin API: health probes plus queue and cache introspection.

pub mod api;
pub mod health;

use axum::routing::get;
use axum::Router;

use crate::process::ServiceState;

/// Build the admin API router.
pub fn router(state: ServiceState) -> Router {
    Router::new()
        .route("/_status/livez", get(health::livez::handler))
        .route("/_status/version", get(health::version::handler))
        .route("/api/v0/queue/stats", get(api::v0::queue_stats::handler))
        .route("/api/v0/cache/stats", get(api::v0::cache_stats::handler))
        .with_state(state)
}
