//! Integration tests for the agent gateway HTTP API.
//!
//! Each test builds an isolated application with a scripted provider and
//! drives it through tower's `oneshot`, so no network or upstream service
//! is involved.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use agent_gateway::api::{build_router, AppState};
use agent_gateway::config::Config;
use agent_gateway::models::StreamChunk;
use agent_gateway::persistence::{AgentConfig, InMemoryStore};
use agent_gateway::relay::{CompletionProvider, MockBehavior, MockProvider};

// == Test Helpers ==

fn test_config() -> Config {
    Config {
        rate_max_anonymous: 5,
        rate_max_authenticated: 10,
        stream_idle_timeout_ms: 1_000,
        stream_total_timeout_ms: 5_000,
        ..Config::default()
    }
}

fn hello_provider() -> Arc<dyn CompletionProvider> {
    Arc::new(MockProvider::new(vec![
        "Hello".to_string(),
        " world".to_string(),
        "!".to_string(),
    ]))
}

fn build_app(config: Config, provider: Arc<dyn CompletionProvider>) -> (Router, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let state = AppState::new(config, provider, store.clone());
    (build_router(state), store)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request build")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request build")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body read");
    serde_json::from_slice(&bytes).expect("body json")
}

/// Parses a concatenated-JSON stream body into chunks.
async fn body_chunks(response: axum::response::Response) -> Vec<StreamChunk> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body read");
    serde_json::Deserializer::from_slice(&bytes)
        .into_iter::<StreamChunk>()
        .collect::<Result<Vec<_>, _>>()
        .expect("chunk parse")
}

// == Health ==

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = build_app(test_config(), hello_provider());

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());
}

// == Non-Streaming Test Call ==

#[tokio::test]
async fn test_agent_test_returns_content_and_usage() {
    let (app, _) = build_app(test_config(), hello_provider());

    let request = post_json(
        "/api/agents/test",
        json!({"message": "hi", "system_prompt": "You are terse."}),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["content"], "Hello world!");
    assert!(body["usage"]["totalTokens"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_agent_test_empty_message_rejected() {
    let (app, _) = build_app(test_config(), hello_provider());

    let request = post_json(
        "/api/agents/test",
        json!({"message": "  ", "system_prompt": "p"}),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn test_agent_test_missing_system_prompt_rejected() {
    let (app, _) = build_app(test_config(), hello_provider());

    let request = post_json("/api/agents/test", json!({"message": "hi"}));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("system prompt"));
}

#[tokio::test]
async fn test_agent_test_unknown_agent_not_found() {
    let (app, _) = build_app(test_config(), hello_provider());

    let request = post_json("/api/agents/test", json!({"message": "hi", "agent_id": "ghost"}));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_agent_test_resolves_stored_agent() {
    let (app, store) = build_app(test_config(), hello_provider());
    store
        .insert_agent(AgentConfig {
            id: "a1".to_string(),
            name: "Helper".to_string(),
            system_prompt: Some("You are helpful.".to_string()),
            model: None,
            temperature: None,
            max_tokens: None,
        })
        .await;

    let request = post_json("/api/agents/test", json!({"message": "hi", "agent_id": "a1"}));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// == Streaming Test Call ==

#[tokio::test]
async fn test_stream_chunk_sequence() {
    let (app, _) = build_app(test_config(), hello_provider());

    let request = post_json(
        "/api/agents/test/stream",
        json!({"message": "hi", "system_prompt": "You are terse."}),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache"
    );

    let chunks = body_chunks(response).await;
    assert_eq!(chunks.len(), 4);
    assert_eq!(chunks[0], StreamChunk::content("Hello"));
    assert_eq!(chunks[1], StreamChunk::content(" world"));
    assert_eq!(chunks[2], StreamChunk::content("!"));
    match &chunks[3] {
        StreamChunk::Done { done, timing, .. } => {
            assert!(*done);
            assert!(timing.total >= timing.streaming);
        }
        other => panic!("expected done chunk, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_upstream_failure_yields_single_error_chunk() {
    let provider = Arc::new(MockProvider::with_behavior(MockBehavior::FailBeforeStream(
        "provider down".to_string(),
    )));
    let (app, _) = build_app(test_config(), provider);

    let request = post_json(
        "/api/agents/test/stream",
        json!({"message": "hi", "system_prompt": "p"}),
    );
    let response = app.oneshot(request).await.unwrap();
    // the response commits before the relay runs
    assert_eq!(response.status(), StatusCode::OK);

    let chunks = body_chunks(response).await;
    assert_eq!(chunks.len(), 1);
    assert!(matches!(
        &chunks[0],
        StreamChunk::Error { error, done: true, .. } if error.contains("provider down")
    ));
}

#[tokio::test]
async fn test_stream_missing_system_prompt_yields_error_chunk() {
    let (app, _) = build_app(test_config(), hello_provider());

    let request = post_json("/api/agents/test/stream", json!({"message": "hi"}));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let chunks = body_chunks(response).await;
    assert_eq!(chunks.len(), 1);
    assert!(matches!(
        &chunks[0],
        StreamChunk::Error { error, .. } if error.contains("system prompt")
    ));
}

#[tokio::test]
async fn test_stream_empty_message_rejected_before_commit() {
    let (app, _) = build_app(test_config(), hello_provider());

    let request = post_json(
        "/api/agents/test/stream",
        json!({"message": "", "system_prompt": "p"}),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// == Rate Limiting ==

#[tokio::test]
async fn test_rate_limit_denies_after_ceiling() {
    let (app, _) = build_app(test_config(), hello_provider());

    for i in 0..5 {
        let request = Request::builder()
            .uri("/api/usage")
            .header("x-forwarded-for", "10.0.0.9")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {} should pass", i + 1);
    }

    let request = Request::builder()
        .uri("/api/usage")
        .header("x-forwarded-for", "10.0.0.9")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(
        response.headers().get("x-ratelimit-remaining").unwrap(),
        "0"
    );

    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("Too many requests"));
}

#[tokio::test]
async fn test_rate_limit_keys_by_client_identity() {
    let (app, _) = build_app(test_config(), hello_provider());

    // exhaust one address
    for _ in 0..6 {
        let request = Request::builder()
            .uri("/api/usage")
            .header("x-forwarded-for", "10.0.0.1")
            .body(Body::empty())
            .unwrap();
        let _ = app.clone().oneshot(request).await.unwrap();
    }

    let request = Request::builder()
        .uri("/api/usage")
        .header("x-forwarded-for", "10.0.0.2")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_headers_on_admitted_responses() {
    let (app, _) = build_app(test_config(), hello_provider());

    let request = Request::builder()
        .uri("/api/usage")
        .header("x-forwarded-for", "10.0.0.3")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "5");
    assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "4");
    assert!(response.headers().contains_key("x-ratelimit-reset"));
}

#[tokio::test]
async fn test_health_is_not_rate_limited() {
    let (app, _) = build_app(test_config(), hello_provider());

    for _ in 0..20 {
        let response = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

// == Usage Endpoint ==

#[tokio::test]
async fn test_usage_aggregation_and_user_filter() {
    let (app, _) = build_app(test_config(), hello_provider());

    for _ in 0..2 {
        let request = Request::builder()
            .method("POST")
            .uri("/api/agents/test")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-user-id", "u1")
            .body(Body::from(
                json!({"message": "hi", "system_prompt": "p"}).to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.clone().oneshot(get("/api/usage?user_id=u1")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["requests"], 2);
    assert!(body["usage"]["totalTokens"].as_u64().unwrap() > 0);

    let response = app.oneshot(get("/api/usage?user_id=nobody")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["requests"], 0);
}

// == Cache Stats Endpoint ==

#[tokio::test]
async fn test_cache_stats_reports_agent_cache_hits() {
    let (app, store) = build_app(test_config(), hello_provider());
    store
        .insert_agent(AgentConfig {
            id: "a1".to_string(),
            name: "Helper".to_string(),
            system_prompt: Some("You are helpful.".to_string()),
            model: None,
            temperature: None,
            max_tokens: None,
        })
        .await;

    for _ in 0..2 {
        let request = post_json("/api/agents/test", json!({"message": "hi", "agent_id": "a1"}));
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.oneshot(get("/api/cache/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let agents = &body["caches"]["agents"];
    // first call misses and fills, second hits
    assert_eq!(agents["total_entries"], 1);
    assert!(agents["hits"].as_u64().unwrap() >= 1);
    assert!(body["caches"]["api_keys"].is_object());
}
