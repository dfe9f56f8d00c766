//! Event submission endpoint

use axum::{extract::rejection::JsonRejection, extract::State, routing::post, Json, Router};
use cg_common::{Event, SynthesizedVerdict};

use crate::{ApiResult, AppState};

/// POST /events
///
/// Assesses one conversation event and returns its verdict. The verdict is
/// also pushed to every live stream subscriber.
pub async fn submit_event(
    State(state): State<AppState>,
    payload: Result<Json<Event>, JsonRejection>,
) -> ApiResult<Json<SynthesizedVerdict>> {
    let Json(event) = payload?;
    let verdict = state.pipeline.submit(event).await?;
    Ok(Json(verdict))
}

pub fn event_routes() -> Router<AppState> {
    Router::new().route("/events", post(submit_event))
}
