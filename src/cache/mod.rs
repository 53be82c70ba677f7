//! Cache Module
//!
//! Provides a generic bounded in-memory cache with TTL expiration,
//! pluggable eviction policies and memoization helpers.

mod entry;
mod eviction;
mod memo;
mod stats;
mod store;


// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry};
pub use eviction::{EntryMeta, EvictionContext, EvictionPolicy, LruPolicy, NearestExpiryPolicy};
pub use memo::{get_or_compute, Memoized};
pub use stats::CacheStats;
pub use store::{estimate_size, string_size, MemoryCache, FALLBACK_SIZE_BYTES};
