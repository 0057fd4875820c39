//! Health Routes
//!
//! - GET /healthz - Liveness probe (process is alive)
//! - GET /health - Status with connection and session counts

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;

/// GET /healthz
///
/// Returns a fixed `ok` body, no dependency checks.
pub async fn liveness() -> &'static str {
    "ok"
}

/// GET /health
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        started_at: state.started_at,
        connections: state.hub.connection_count().await,
        sessions: state.registry.session_count().await,
    })
}
