//! Liveness and readiness endpoints.
//!
//! Served outside the dispatch path, so they never hit the pipeline and
//! never appear in access logs.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::http::server::AppState;

/// Liveness: the process is up and serving.
pub async fn live() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Readiness: the registry is populated and the gateway can route.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    if state.registry.is_empty() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "no services registered" })),
        );
    }
    (StatusCode::OK, Json(json!({ "status": "ready" })))
}
