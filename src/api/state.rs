//! Application State Module
//!
//! Shared state handed to every handler. Everything is injected so tests
//! assemble isolated states with mock collaborators.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::cache::{string_size, MemoryCache};
use crate::config::Config;
use crate::limiter::RateLimiter;
use crate::persistence::{AgentConfig, ConversationStore};
use crate::relay::{CompletionProvider, CompletionRelay, RelayConfig, UsageLog};

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<CompletionRelay>,
    pub limiter: Arc<RateLimiter>,
    pub usage_log: Arc<UsageLog>,
    pub agent_cache: Arc<RwLock<MemoryCache<AgentConfig>>>,
    pub api_key_cache: Arc<RwLock<MemoryCache<String>>>,
    pub config: Config,
}

impl AppState {
    /// Assembles the state graph around the given provider and store.
    pub fn new(
        config: Config,
        provider: Arc<dyn CompletionProvider>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        let agent_cache = Arc::new(RwLock::new(build_cache::<AgentConfig>(&config)));
        let api_key_cache = Arc::new(RwLock::new(
            build_cache::<String>(&config).with_sizer(string_size),
        ));
        let usage_log = Arc::new(UsageLog::new());

        let relay = Arc::new(CompletionRelay::new(
            provider,
            store,
            usage_log.clone(),
            agent_cache.clone(),
            api_key_cache.clone(),
            RelayConfig {
                idle_timeout: std::time::Duration::from_millis(config.stream_idle_timeout_ms),
                total_timeout: std::time::Duration::from_millis(config.stream_total_timeout_ms),
                default_model: config.default_model.clone(),
            },
            config.upstream_api_key.clone(),
        ));

        Self {
            relay,
            limiter: Arc::new(RateLimiter::new(&config)),
            usage_log,
            agent_cache,
            api_key_cache,
            config,
        }
    }
}

fn build_cache<T: Clone + Serialize>(config: &Config) -> MemoryCache<T> {
    let cache = MemoryCache::new(config.cache_max_entries, config.cache_default_ttl_ms);
    if config.cache_max_bytes > 0 {
        cache.with_byte_budget(config.cache_max_bytes)
    } else {
        cache
    }
}
