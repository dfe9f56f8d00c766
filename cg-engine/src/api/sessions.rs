//! Session query endpoints

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use cg_common::{SessionHistory, SusceptibilityReport};

use crate::AppState;

/// GET /sessions/:id/history
///
/// Retained history, oldest first. Unknown or expired sessions return an
/// empty history rather than 404, matching what a new event would see.
pub async fn session_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<SessionHistory> {
    Json(state.pipeline.tracker().history(&session_id))
}

/// GET /sessions/:id/susceptibility
pub async fn session_susceptibility(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<SusceptibilityReport> {
    Json(state.pipeline.tracker().susceptibility(&session_id))
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions/:id/history", get(session_history))
        .route("/sessions/:id/susceptibility", get(session_susceptibility))
}
