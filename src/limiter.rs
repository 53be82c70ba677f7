//! Rate Limiter Module
//!
//! Fixed-window request limiter over the shared cache type. Each caller
//! identity owns a window record whose TTL matches the window, so idle
//! identities age out without a dedicated sweeper. Authenticated callers
//! get a higher ceiling than anonymous ones.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::{current_timestamp_ms, MemoryCache};
use crate::config::Config;
use crate::error::GatewayError;

/// Identity records kept before the window cache starts evicting.
const MAX_TRACKED_IDENTITIES: usize = 10_000;

// == Authenticated User ==
/// Caller identity injected by the authentication layer.
///
/// Present as a request extension when the caller is authenticated; its
/// absence marks the request anonymous.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

// == Rate Window ==
/// One identity's counter within the current fixed window.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RateWindow {
    count: u32,
    /// Window end (Unix milliseconds); a request after this starts fresh
    window_reset_at: u64,
}

// == Decision ==
/// Outcome of one rate-limit check, with the header material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Ceiling applied to this identity
    pub limit: u32,
    /// Requests left in the window (0 when denied)
    pub remaining: u32,
    /// Window end (Unix milliseconds)
    pub reset_at_ms: u64,
    /// Whole seconds until the window resets, rounded up
    pub retry_after_secs: u64,
}

// == Rate Limiter ==
/// Fixed-window limiter backed by a window cache keyed by identity.
pub struct RateLimiter {
    windows: Arc<RwLock<MemoryCache<RateWindow>>>,
    window_ms: u64,
    max_anonymous: u32,
    max_authenticated: u32,
    emit_headers: bool,
    deny_status: StatusCode,
}

impl RateLimiter {
    /// Creates a limiter from the application configuration.
    pub fn new(config: &Config) -> Self {
        Self {
            windows: Arc::new(RwLock::new(MemoryCache::new(
                MAX_TRACKED_IDENTITIES,
                config.rate_window_ms,
            ))),
            window_ms: config.rate_window_ms,
            max_anonymous: config.rate_max_anonymous,
            max_authenticated: config.rate_max_authenticated,
            emit_headers: config.rate_headers_enabled,
            deny_status: StatusCode::from_u16(config.rate_limit_status)
                .unwrap_or(StatusCode::TOO_MANY_REQUESTS),
        }
    }

    /// Ceiling for the given caller class.
    fn limit_for(&self, authenticated: bool) -> u32 {
        if authenticated {
            self.max_authenticated
        } else {
            self.max_anonymous
        }
    }

    // == Check ==
    /// Counts one request against `identity` and decides whether it may
    /// proceed.
    ///
    /// The first request after a window lapses starts a fresh window; a
    /// denied request still leaves the counter intact, so the caller keeps
    /// being denied until the reset.
    pub async fn check(&self, identity: &str, authenticated: bool) -> RateLimitDecision {
        let limit = self.limit_for(authenticated);
        let now = current_timestamp_ms();
        let mut windows = self.windows.write().await;

        let window = match windows.get(identity) {
            Some(window) if now <= window.window_reset_at => RateWindow {
                count: window.count + 1,
                window_reset_at: window.window_reset_at,
            },
            _ => RateWindow {
                count: 1,
                window_reset_at: now + self.window_ms,
            },
        };

        // TTL pinned to the window end so the reset time stays stable
        // across increments.
        let remaining_ttl = window.window_reset_at.saturating_sub(now).max(1);
        windows.set(identity.to_string(), window.clone(), Some(remaining_ttl));
        drop(windows);

        let allowed = window.count <= limit;
        let retry_after_secs = window
            .window_reset_at
            .saturating_sub(now)
            .div_ceil(1000)
            .max(1);

        if !allowed {
            warn!(identity, limit, "Rate limit exceeded");
        }

        RateLimitDecision {
            allowed,
            limit,
            remaining: limit.saturating_sub(window.count),
            reset_at_ms: window.window_reset_at,
            retry_after_secs,
        }
    }
}

// == Identity Resolution ==
/// Derives the rate-limit identity for a request.
///
/// Authenticated callers (an [`AuthUser`] extension, or the `x-user-id`
/// header the dev proxy sets) key as `user:{id}`. Everyone else keys by
/// client address: `x-forwarded-for` first, then the socket peer, then a
/// shared `unknown` bucket.
pub fn request_identity(request: &Request) -> (String, bool) {
    if let Some(AuthUser(user_id)) = request.extensions().get::<AuthUser>() {
        return (format!("user:{}", user_id), true);
    }
    if let Some(user_id) = request
        .headers()
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
    {
        return (format!("user:{}", user_id), true);
    }

    let ip = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    (format!("ip:{}", ip), false)
}

// == Middleware ==
/// Axum middleware enforcing the limiter on every request it wraps.
///
/// Denied requests get 429 with `Retry-After`; when header emission is
/// enabled, every response carries the `X-RateLimit-*` trio.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let (identity, authenticated) = request_identity(&request);
    let decision = limiter.check(&identity, authenticated).await;

    let mut response = if decision.allowed {
        debug!(identity, remaining = decision.remaining, "Request within rate limit");
        next.run(request).await
    } else {
        let mut denied = GatewayError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        }
        .into_response();
        *denied.status_mut() = limiter.deny_status;
        denied
    };

    if limiter.emit_headers {
        apply_headers(&mut response, &decision);
    }
    response
}

fn apply_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", value);
    }
    // reset is reported in unix seconds
    if let Ok(value) = HeaderValue::from_str(&(decision.reset_at_ms / 1000).to_string()) {
        headers.insert("x-ratelimit-reset", value);
    }
}
