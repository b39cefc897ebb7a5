//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the store cannot be read
    pub status: String,
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Short commit hash the binary was built from
    pub git_commit: String,
    pub built_at: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Latest change feed sequence, if the store answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_sequence: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let (status, latest_sequence, last_error) = match state.changes.latest_sequence().await {
        Ok(seq) => ("ok", Some(seq), None),
        Err(e) => ("degraded", None, Some(e.to_string())),
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: "sel-ingest".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_commit: env!("SEL_GIT_COMMIT").to_string(),
        built_at: env!("SEL_BUILT_AT").to_string(),
        uptime_seconds,
        latest_sequence,
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
