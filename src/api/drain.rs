//! Manual drain trigger for operators. The scheduled daemon covers normal
//! operation; this endpoint exists for catching up after incidents.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use tracing::error;

use crate::app::AppState;

#[derive(Debug, Serialize)]
struct DrainResponse {
    claimed: usize,
    completed: usize,
    failed: usize,
    recovered: u64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub(crate) async fn trigger(State(state): State<AppState>) -> impl IntoResponse {
    match state.drain_worker().drain().await {
        Ok(summary) => (
            StatusCode::OK,
            Json(DrainResponse {
                claimed: summary.claimed,
                completed: summary.completed,
                failed: summary.failed,
                recovered: summary.recovered,
            }),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "manual drain cycle failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("{err:#}"),
                }),
            )
                .into_response()
        }
    }
}
