//! Server-Sent Events stream of synthesized verdicts

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    /// Only forward verdicts for this session
    pub session_id: Option<String>,
}

/// GET /verdicts/stream - live verdict feed
///
/// Each verdict is sent as an event named `verdict` with the JSON verdict
/// as data. The stream ends when the hub drops the subscriber (for example
/// when it falls too far behind); a client disconnect drops the
/// subscription and the hub unregisters it on the next publish.
pub async fn verdict_stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = state.pipeline.hub().subscribe();
    info!(
        subscription = %subscription.id(),
        session_filter = ?params.session_id,
        "New SSE client connected to verdict stream"
    );

    let stream = async_stream::stream! {
        while let Some(verdict) = subscription.recv().await {
            if let Some(filter) = &params.session_id {
                if &verdict.session_id != filter {
                    continue;
                }
            }
            match serde_json::to_string(verdict.as_ref()) {
                Ok(json) => {
                    debug!(event_ref = %verdict.event_ref, "SSE: Sending verdict");
                    yield Ok(Event::default().event("verdict").data(json));
                }
                Err(e) => {
                    warn!(event_ref = %verdict.event_ref, error = %e, "SSE: Failed to serialize verdict");
                }
            }
        }
        debug!(subscription = %subscription.id(), "SSE: Verdict stream ended");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
