//! HTTP Server & Routing Integration Tests

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use cg_engine::{build_router, AppState};
use helpers::{pipeline, ScriptedAdapter};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app_state() -> AppState {
    AppState::new(pipeline(vec![ScriptedAdapter::scoring("A", 0.65)]))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_event(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/events")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_post_event_returns_verdict() {
    let app = build_router(app_state());

    let response = app
        .oneshot(post_event(json!({
            "session_id": "s1",
            "sender": "user",
            "text": "hello there"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let verdict = body_json(response).await;
    assert_eq!(verdict["session_id"], "s1");
    assert_eq!(verdict["escalation_level"], "HIGH");
    assert_eq!(verdict["contributing_modules"], 1);
    assert_eq!(verdict["per_module"]["A"]["score"], 0.65);
}

#[tokio::test]
async fn test_post_event_rejects_missing_session_id() {
    let app = build_router(app_state());

    let response = app
        .oneshot(post_event(json!({
            "session_id": "",
            "sender": "user",
            "text": "hello"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_post_event_rejects_malformed_json() {
    let app = build_router(app_state());

    let response = app
        .oneshot(post_event(json!({ "session_id": "s1", "sender": "robot" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_session_history_after_event() {
    let state = app_state();
    let app = build_router(state.clone());

    let response = app
        .clone()
        .oneshot(post_event(json!({
            "session_id": "s1",
            "sender": "ai",
            "text": "how can I help?"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/sessions/s1/history")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let history = body_json(response).await;
    assert_eq!(history["session_id"], "s1");
    assert_eq!(history["entries"].as_array().unwrap().len(), 1);
    assert_eq!(history["entries"][0]["sender"], "ai");
}

#[tokio::test]
async fn test_unknown_session_has_empty_susceptibility() {
    let app = build_router(app_state());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/sessions/nobody/susceptibility")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["score"], 0.0);
    assert_eq!(report["grade"], "Low");
}

#[tokio::test]
async fn test_health_reports_components() {
    let app = build_router(app_state());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let health = body_json(response).await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["module"], "cg-engine");
    assert_eq!(health["modules"], json!(["A"]));
    assert_eq!(health["subscribers"], 0);
    assert_eq!(health["persistence"], false);
}

#[tokio::test]
async fn test_verdict_stream_is_event_stream() {
    let state = app_state();
    let app = build_router(state.clone());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/verdicts/stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().starts_with("text/event-stream"));
    assert_eq!(state.pipeline.hub().subscriber_count(), 1);

    // Publish one verdict and read the first frame
    state
        .pipeline
        .submit(helpers::event("s1", "hello"))
        .await
        .unwrap();
    let mut body = response.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.starts_with("event: verdict"));
    assert!(text.contains("\"session_id\":\"s1\""));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = build_router(app_state());

    let response = app
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert!(body["error"]["message"].as_str().unwrap().contains("/nope"));
}
