//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,

    /// Maximum number of entries per cache
    pub cache_max_entries: usize,
    /// Aggregate byte budget per cache (0 disables the budget)
    pub cache_max_bytes: usize,
    /// Default TTL in milliseconds for entries without explicit TTL
    pub cache_default_ttl_ms: u64,
    /// Background cleanup interval in milliseconds
    pub cleanup_interval_ms: u64,

    /// Rate limit window in milliseconds
    pub rate_window_ms: u64,
    /// Request ceiling per window for anonymous callers
    pub rate_max_anonymous: u32,
    /// Request ceiling per window for authenticated callers
    pub rate_max_authenticated: u32,
    /// Whether to attach X-RateLimit-* headers to admitted responses
    pub rate_headers_enabled: bool,
    /// HTTP status returned on denial (default 429)
    pub rate_limit_status: u16,

    /// Maximum gap between upstream chunks in milliseconds
    pub stream_idle_timeout_ms: u64,
    /// Maximum end-to-end stream duration in milliseconds
    pub stream_total_timeout_ms: u64,

    /// Upstream completion API base URL
    pub upstream_base_url: String,
    /// Model used when neither the agent nor the request names one
    pub default_model: String,
    /// Environment-default provider credential (per-user keys take priority)
    pub upstream_api_key: Option<String>,
    /// Serve canned completions instead of calling the upstream
    pub mock_completions: bool,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CACHE_MAX_ENTRIES` - Max entries per cache (default: 1000)
    /// - `CACHE_MAX_BYTES` - Byte budget per cache, 0 = unbounded (default: 0)
    /// - `CACHE_DEFAULT_TTL_MS` - Default entry TTL (default: 300000)
    /// - `CLEANUP_INTERVAL_MS` - Cleanup frequency (default: half the TTL)
    /// - `RATE_WINDOW_MS` - Rate limit window (default: 60000)
    /// - `RATE_MAX_ANONYMOUS` / `RATE_MAX_AUTHENTICATED` - Ceilings (60 / 300)
    /// - `RATE_HEADERS_ENABLED` - Attach X-RateLimit-* headers (default: true)
    /// - `RATE_LIMIT_STATUS` - HTTP status returned on denial (default: 429)
    /// - `STREAM_IDLE_TIMEOUT_MS` - Per-chunk idle ceiling (default: 30000)
    /// - `STREAM_TOTAL_TIMEOUT_MS` - End-to-end ceiling (default: 120000)
    /// - `UPSTREAM_BASE_URL` - Completion API base URL
    /// - `DEFAULT_MODEL` - Fallback model identifier
    /// - `UPSTREAM_API_KEY` - Environment-default credential
    /// - `MOCK_COMPLETIONS` - Serve canned completions ("1"/"true")
    pub fn from_env() -> Self {
        let cache_default_ttl_ms = env_parse("CACHE_DEFAULT_TTL_MS", 300_000);
        Self {
            server_port: env_parse("SERVER_PORT", 3000),
            cache_max_entries: env_parse("CACHE_MAX_ENTRIES", 1000),
            cache_max_bytes: env_parse("CACHE_MAX_BYTES", 0),
            cache_default_ttl_ms,
            cleanup_interval_ms: env_parse("CLEANUP_INTERVAL_MS", cache_default_ttl_ms / 2),
            rate_window_ms: env_parse("RATE_WINDOW_MS", 60_000),
            rate_max_anonymous: env_parse("RATE_MAX_ANONYMOUS", 60),
            rate_max_authenticated: env_parse("RATE_MAX_AUTHENTICATED", 300),
            rate_headers_enabled: env_flag("RATE_HEADERS_ENABLED", true),
            rate_limit_status: env_parse("RATE_LIMIT_STATUS", 429),
            stream_idle_timeout_ms: env_parse("STREAM_IDLE_TIMEOUT_MS", 30_000),
            stream_total_timeout_ms: env_parse("STREAM_TOTAL_TIMEOUT_MS", 120_000),
            upstream_base_url: env::var("UPSTREAM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            default_model: env::var("DEFAULT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            upstream_api_key: env::var("UPSTREAM_API_KEY").ok(),
            mock_completions: env_flag("MOCK_COMPLETIONS", false),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            cache_max_entries: 1000,
            cache_max_bytes: 0,
            cache_default_ttl_ms: 300_000,
            cleanup_interval_ms: 150_000,
            rate_window_ms: 60_000,
            rate_max_anonymous: 60,
            rate_max_authenticated: 300,
            rate_headers_enabled: true,
            rate_limit_status: 429,
            stream_idle_timeout_ms: 30_000,
            stream_total_timeout_ms: 120_000,
            upstream_base_url: "https://api.openai.com/v1".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            upstream_api_key: None,
            mock_completions: false,
        }
    }
}

// == Env Helpers ==
fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"),
        Err(_) => default,
    }
}
