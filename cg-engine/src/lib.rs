//! cg-engine library interface
//!
//! Conversational threat-assessment core: module adapters run concurrently
//! per event, their results are synthesized into one escalation verdict,
//! tracked per session and fanned out to live subscribers.

pub mod adapters;
pub mod api;
pub mod broadcast;
pub mod cache;
pub mod error;
pub mod maintenance;
pub mod orchestrator;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod synthesis;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use pipeline::Pipeline;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            startup_time: Utc::now(),
        }
    }
}

async fn route_not_found(uri: axum::http::Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::event_routes())
        .route("/verdicts/stream", get(api::verdict_stream))
        .merge(api::session_routes())
        .merge(api::health_routes())
        .fallback(route_not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
