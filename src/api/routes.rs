//! API Routes Module
//!
//! Wires handlers into the router. The rate-limit middleware wraps only
//! the `/api` subtree; the health probe stays outside it.

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api::handlers;
use crate::api::state::AppState;
use crate::limiter::rate_limit_middleware;

/// Builds the application router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let limiter = Arc::clone(&state.limiter);

    let api = Router::new()
        .route("/agents/test", post(handlers::test_agent))
        .route("/agents/test/stream", post(handlers::test_agent_stream))
        .route("/usage", get(handlers::usage_summary))
        .route("/cache/stats", get(handlers::cache_stats))
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

    Router::new()
        .nest("/api", api)
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
