//! Memoization Module
//!
//! Cache-aside helpers: compute-on-miss reads and a memoizing wrapper for
//! async functions keyed by a caller-supplied derivation.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::cache::MemoryCache;

// == Get Or Compute ==
/// Returns the cached value under `key`, or awaits `compute`, stores its
/// result with the given TTL and returns it.
///
/// The cache lock is held across the computation, so a concurrent call for
/// the same key waits and then resolves from the cache instead of invoking
/// `compute` a second time. Computations are expected to be short lookups;
/// long-running work would stall every reader of the same cache.
///
/// A failed computation propagates to the caller and caches nothing, so
/// the next caller retries.
pub async fn get_or_compute<T, E, F, Fut>(
    cache: &Arc<RwLock<MemoryCache<T>>>,
    key: &str,
    ttl_ms: Option<u64>,
    compute: F,
) -> Result<T, E>
where
    T: Clone + Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut guard = cache.write().await;
    if let Some(value) = guard.get(key) {
        return Ok(value);
    }

    let value = compute().await?;
    guard.set(key.to_string(), value.clone(), ttl_ms);
    Ok(value)
}

// == Memoized ==
/// Wraps an async function so calls with equivalent arguments resolve from
/// the cache.
///
/// The key function maps arguments to cache keys; distinct argument values
/// colliding on the same key are treated as equivalent, so collision safety
/// is the key function's responsibility.
pub struct Memoized<A, T, K, F> {
    cache: Arc<RwLock<MemoryCache<T>>>,
    key_fn: K,
    compute: F,
    ttl_ms: Option<u64>,
    _args: PhantomData<fn(A)>,
}

impl<A, T, E, K, F, Fut> Memoized<A, T, K, F>
where
    T: Clone + Serialize,
    K: Fn(&A) -> String,
    F: Fn(A) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    /// Creates a memoized wrapper over `compute` using `key_fn` for key
    /// derivation and the shared cache for storage.
    pub fn new(
        cache: Arc<RwLock<MemoryCache<T>>>,
        key_fn: K,
        compute: F,
        ttl_ms: Option<u64>,
    ) -> Self {
        Self {
            cache,
            key_fn,
            compute,
            ttl_ms,
            _args: PhantomData,
        }
    }

    /// Invokes the wrapped function, resolving from the cache when possible.
    pub async fn call(&self, args: A) -> Result<T, E> {
        let key = (self.key_fn)(&args);
        get_or_compute(&self.cache, &key, self.ttl_ms, || (self.compute)(args)).await
    }
}
