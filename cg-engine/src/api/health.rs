//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::cache::CacheStats;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok")
    pub status: String,
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    pub git_hash: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Installed analysis modules
    pub modules: Vec<String>,
    /// Live verdict stream subscribers
    pub subscribers: usize,
    pub active_sessions: usize,
    pub cache: CacheStats,
    pub persistence: bool,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let pipeline = &state.pipeline;

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "cg-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        modules: pipeline.module_ids(),
        subscribers: pipeline.hub().subscriber_count(),
        active_sessions: pipeline.tracker().active_sessions(),
        cache: pipeline.cache().stats(),
        persistence: pipeline.store().is_some(),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
