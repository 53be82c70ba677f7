//! Error types for the agent gateway
//!
//! Provides unified error handling using thiserror. Cache bookkeeping
//! errors never surface here; they are logged and degrade in place. This
//! taxonomy covers everything that reaches the HTTP layer.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Gateway Error Enum ==
/// Unified error type for the agent gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Agent configuration resolved without a system prompt
    #[error("No system prompt configured for this agent")]
    MissingSystemPrompt,

    /// Invalid request data (absent message, bad fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local rate limit exceeded
    #[error("Too many requests, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Upstream rejected the provider credential
    #[error("Completion provider rejected the API credential; re-enter your API key")]
    UpstreamAuth,

    /// Upstream reported its own rate limit
    #[error("Completion provider rate limit exceeded")]
    UpstreamRateLimited,

    /// Upstream 5xx failure
    #[error("Completion provider error: {0}")]
    UpstreamServer(String),

    /// Any other upstream failure
    #[error("Completion request failed: {0}")]
    Upstream(String),

    /// Total stream duration ceiling exceeded
    #[error("Completion stream exceeded the maximum duration")]
    StreamTimeout,

    /// Gap between chunks exceeded the idle ceiling
    #[error("Completion stream stalled; no data received before the idle timeout")]
    StreamIdleTimeout,

    /// Persistence collaborator failure
    #[error("Storage error: {0}")]
    Persistence(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status used when the error surfaces before the response is
    /// committed. Streaming failures after commit are delivered as a
    /// terminal chunk instead.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MissingSystemPrompt | GatewayError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::UpstreamAuth => StatusCode::UNAUTHORIZED,
            GatewayError::UpstreamRateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::UpstreamServer(_) | GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::StreamTimeout | GatewayError::StreamIdleTimeout => {
                StatusCode::GATEWAY_TIMEOUT
            }
            GatewayError::Persistence(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the non-streaming path may retry this failure.
    ///
    /// Only transient upstream 5xx failures qualify; auth and rate-limit
    /// errors require caller action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::UpstreamServer(_))
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse::new(self.to_string()));

        match self {
            GatewayError::RateLimited { retry_after_secs } => (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the agent gateway.
pub type Result<T> = std::result::Result<T, GatewayError>;
