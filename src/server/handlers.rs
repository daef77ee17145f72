//! Root, health and fallback handlers.

use axum::{
    extract::{OriginalUri, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::app::AppState;
use crate::error::Error;

/// Handle GET /
pub async fn hello() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "Hello World" }))
}

/// Handle GET /health
///
/// 200 with the snapshot when the store answers, 503 otherwise.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.health.snapshot().await;
    let status = if snapshot.is_up() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(snapshot))
}

/// Unmatched routes still pass through instrumentation as a 404.
pub async fn not_found(OriginalUri(uri): OriginalUri) -> Error {
    Error::NotFound(format!("route '{}'", uri.path()))
}
