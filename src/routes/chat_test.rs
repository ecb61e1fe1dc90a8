use axum::body::Body;
use axum::http::Request;
use serde_json::json;

use super::*;
use crate::routes::app;
use crate::routes::test_support::{call, json_request};
use crate::state::test_helpers::{MockProvider, server_error, test_app_state};

fn healthy_state() -> AppState {
    test_app_state(MockProvider::new(ProviderKind::Groq), MockProvider::new(ProviderKind::HuggingFace))
}

fn chat(user_id: &str, message: &str) -> Request<Body> {
    json_request("POST", "/api/chat", &json!({"userId": user_id, "message": message}))
}

#[tokio::test]
async fn chat_returns_reply_and_provider() {
    let state = healthy_state();
    let (status, body) = call(app(state.clone()), chat("u1", "hi")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "reply from groq");
    assert_eq!(body["provider"], "groq");
    assert_eq!(state.conversations.get_context("u1").len(), 2);
}

#[tokio::test]
async fn chat_rejects_blank_fields() {
    let state = healthy_state();

    let (status, body) = call(app(state.clone()), chat("u1", "   ")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "E_INVALID_REQUEST");

    let (status, _) = call(app(state.clone()), chat("", "hi")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    // Blank requests never count against the user.
    assert_eq!(state.rate_limiter.user_request_count("u1"), None);
}

#[tokio::test]
async fn chat_maps_rate_limit_to_429() {
    let state = healthy_state();
    for _ in 0..10 {
        let (status, _) = call(app(state.clone()), chat("u1", "hi")).await;
        assert_eq!(status, StatusCode::OK);
    }

    let res = tower::ServiceExt::oneshot(app(state), chat("u1", "hi")).await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(res.headers().contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn chat_maps_total_failure_to_503() {
    let primary = MockProvider::scripted(ProviderKind::Groq, vec![Err(server_error(ProviderKind::Groq))]);
    let fallback = MockProvider::scripted(
        ProviderKind::HuggingFace,
        vec![Err(server_error(ProviderKind::HuggingFace))],
    );
    let state = test_app_state(primary, fallback);

    let (status, body) = call(app(state), chat("u1", "hi")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "E_NO_PROVIDER");
    assert_eq!(body["retryable"], true);
    assert!(body["message"].as_str().unwrap().contains("try again"));
}
