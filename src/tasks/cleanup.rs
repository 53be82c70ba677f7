//! Background Cleanup Module
//!
//! Periodic sweep removing expired cache entries. Lazy expiry on read
//! already keeps results correct; the sweep reclaims memory held by keys
//! nobody reads again.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::MemoryCache;

/// Spawns the periodic expiry sweep for one cache.
///
/// Runs until the returned handle is aborted at shutdown. `name` labels
/// the cache in logs.
pub fn spawn_cleanup_task<T>(
    cache: Arc<RwLock<MemoryCache<T>>>,
    name: &'static str,
    interval_ms: u64,
) -> JoinHandle<()>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    info!(cache = name, interval_ms, "Starting cache cleanup task");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        // the first tick fires immediately; skip it
        interval.tick().await;

        loop {
            interval.tick().await;
            let removed = cache.write().await.cleanup_expired();
            if removed > 0 {
                debug!(cache = name, removed, "Swept expired cache entries");
            }
        }
    })
}
