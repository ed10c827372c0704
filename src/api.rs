pub(crate) mod drain;
pub(crate) mod health;
pub(crate) mod metrics;
pub(crate) mod scans;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::app::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::exporter))
        .route("/v1/scans", post(scans::submit))
        .route("/v1/scans/{job_id}", get(scans::get_scan))
        .route("/v1/scans/{job_id}/listings", get(scans::get_listings))
        .route("/v1/users/{user_id}/scans/latest", get(scans::latest_for_user))
        .route("/v1/rate-limit", get(scans::rate_limit_status))
        .route("/v1/queue/drain", post(drain::trigger))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
