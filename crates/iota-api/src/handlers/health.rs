//! Health and liveness handlers

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Greeting of the mini HTTP server
pub const LIVENESS_GREETING: &str = "Hello from knot";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions: usize,
    pub uptime_secs: u64,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.gateway.sessions.len(),
        uptime_secs: state.uptime_secs(),
    })
}

/// POST / on the mini HTTP server
pub async fn liveness() -> &'static str {
    LIVENESS_GREETING
}
