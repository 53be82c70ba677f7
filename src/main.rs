//! Agent Gateway server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_gateway::api::{build_router, AppState};
use agent_gateway::config::Config;
use agent_gateway::persistence::InMemoryStore;
use agent_gateway::relay::{CompletionProvider, HttpProvider, MockProvider};
use agent_gateway::tasks::spawn_cleanup_task;

/// Main entry point for the agent gateway.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Assemble application state (caches, limiter, relay)
/// 4. Start background cache cleanup tasks
/// 5. Create Axum router with all endpoints
/// 6. Start HTTP server on configured port
/// 7. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber with env filter
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Agent Gateway");

    let config = Config::from_env();
    info!(
        "Configuration loaded: port={}, cache_max_entries={}, rate_window_ms={}, upstream={}",
        config.server_port, config.cache_max_entries, config.rate_window_ms, config.upstream_base_url
    );

    let provider: Arc<dyn CompletionProvider> = if config.mock_completions {
        warn!("MOCK_COMPLETIONS enabled, serving canned completions");
        Arc::new(MockProvider::canned())
    } else {
        Arc::new(HttpProvider::new(
            config.upstream_base_url.clone(),
            config.upstream_api_key.clone(),
        ))
    };

    let state = AppState::new(config.clone(), provider, Arc::new(InMemoryStore::new()));
    info!("Application state initialized");

    let cleanup_handles = vec![
        spawn_cleanup_task(
            state.agent_cache.clone(),
            "agents",
            config.cleanup_interval_ms,
        ),
        spawn_cleanup_task(
            state.api_key_cache.clone(),
            "api_keys",
            config.cleanup_interval_ms,
        ),
    ];
    info!("Background cleanup tasks started");

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    // ConnectInfo feeds the rate limiter's socket-address fallback
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(cleanup_handles))
    .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then stops the
/// background tasks.
async fn shutdown_signal(cleanup_handles: Vec<JoinHandle<()>>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    for handle in cleanup_handles {
        handle.abort();
    }
    warn!("Cleanup tasks aborted");
}
