//! API Handlers Module
//!
//! Request handlers for the gateway endpoints. Streaming responses commit
//! a 200 before the relay runs, so failures past that point arrive as a
//! terminal error chunk rather than an HTTP status.

use std::convert::Infallible;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, request::Parts},
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::info;

use crate::api::state::AppState;
use crate::error::{GatewayError, Result};
use crate::limiter::AuthUser;
use crate::models::{
    CacheStatsResponse, HealthResponse, TestAgentRequest, TestAgentResponse, UsageSummaryResponse,
};

// == Caller Extractor ==
/// Authenticated caller identity, when present.
///
/// Mirrors the limiter's identity chain: the [`AuthUser`] extension first,
/// then the `x-user-id` header. Anonymous requests extract as `None`.
pub struct Caller(pub Option<String>);

#[async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Infallible> {
        if let Some(AuthUser(user_id)) = parts.extensions.get::<AuthUser>() {
            return Ok(Caller(Some(user_id.clone())));
        }
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        Ok(Caller(user_id))
    }
}

// == Test Agent (non-streaming) ==
/// `POST /api/agents/test` - runs a completion and returns the full text
/// with provider-reported usage.
pub async fn test_agent(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Json(request): Json<TestAgentRequest>,
) -> Result<Json<TestAgentResponse>> {
    if let Some(message) = request.validate() {
        return Err(GatewayError::InvalidRequest(message));
    }

    info!(agent_id = ?request.agent_id, "Non-streaming agent test");
    let response = state.relay.complete(&request, user_id.as_deref()).await?;
    Ok(Json(response))
}

// == Test Agent (streaming) ==
/// `POST /api/agents/test/stream` - relays the completion as a chunked
/// body of concatenated JSON objects.
pub async fn test_agent_stream(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Json(request): Json<TestAgentRequest>,
) -> Result<Response> {
    if let Some(message) = request.validate() {
        return Err(GatewayError::InvalidRequest(message));
    }

    info!(agent_id = ?request.agent_id, "Streaming agent test");
    let chunks = state.relay.stream_chunks(request, user_id);
    let body_stream = chunks.map(|chunk| {
        Ok::<_, Infallible>(Bytes::from(serde_json::to_vec(&chunk).unwrap_or_default()))
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body_stream))
        .map_err(|err| GatewayError::Internal(err.to_string()))
}

// == Usage Summary ==
/// Filters accepted by the usage endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct UsageQuery {
    pub user_id: Option<String>,
    /// Lower time bound (Unix milliseconds, inclusive)
    pub since_ms: Option<u64>,
}

/// `GET /api/usage` - aggregated token usage, optionally filtered.
pub async fn usage_summary(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> Json<UsageSummaryResponse> {
    let (requests, usage) = state
        .usage_log
        .summarize(query.user_id.as_deref(), query.since_ms)
        .await;
    Json(UsageSummaryResponse { requests, usage })
}

// == Cache Stats ==
/// `GET /api/cache/stats` - statistics for every named cache.
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    let mut caches = std::collections::BTreeMap::new();
    caches.insert(
        "agents".to_string(),
        state.agent_cache.read().await.stats().into(),
    );
    caches.insert(
        "api_keys".to_string(),
        state.api_key_cache.read().await.stats().into(),
    );
    Json(CacheStatsResponse { caches })
}

// == Health ==
/// `GET /health` - liveness probe, never rate limited.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse::healthy())
}
