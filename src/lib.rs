//! Agent Gateway - HTTP service for testing AI agent configurations
//!
//! Relays completion requests to an upstream provider with streaming,
//! backed by bounded in-memory caches, fixed-window rate limiting and
//! token usage accounting.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod limiter;
pub mod models;
pub mod persistence;
pub mod relay;
pub mod tasks;

pub use api::{build_router, AppState};
pub use config::Config;
pub use error::{GatewayError, Result};
