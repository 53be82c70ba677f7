//! Cache Store Module
//!
//! Generic bounded cache combining HashMap storage with TTL expiration,
//! byte-budget accounting and a pluggable eviction policy.

use std::collections::HashMap;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::cache::{
    CacheEntry, CacheStats, EntryMeta, EvictionContext, EvictionPolicy, LruPolicy,
};

// == Size Estimation ==
/// Fallback size charged when a value cannot be serialized.
pub const FALLBACK_SIZE_BYTES: usize = 256;

/// Estimates a value's size from its JSON serialization length.
///
/// Serialization failure degrades to a fixed conservative estimate; it
/// never fails the caller's operation.
pub fn estimate_size<T: Serialize>(value: &T) -> usize {
    match serde_json::to_vec(value) {
        Ok(bytes) => bytes.len(),
        Err(err) => {
            warn!(error = %err, "Size estimation failed, using fallback estimate");
            FALLBACK_SIZE_BYTES
        }
    }
}

/// Sizes a string as two bytes per character (UTF-16 assumption).
///
/// Use via [`MemoryCache::with_sizer`] for string-valued caches.
pub fn string_size(value: &String) -> usize {
    2 * value.chars().count()
}

// == Memory Cache ==
/// Bounded TTL cache with size accounting and injected eviction policy.
#[derive(Debug)]
pub struct MemoryCache<T> {
    /// Key-value storage
    entries: HashMap<String, CacheEntry<T>>,
    /// Performance statistics
    stats: CacheStats,
    /// Maximum number of entries allowed
    max_entries: usize,
    /// Optional aggregate byte budget
    max_bytes: Option<usize>,
    /// Default TTL in milliseconds for entries without explicit TTL
    default_ttl_ms: u64,
    /// Victim selection strategy
    policy: Box<dyn EvictionPolicy>,
    /// Per-value size estimator
    sizer: fn(&T) -> usize,
    /// Running byte total across live entries
    total_bytes: usize,
}

impl<T: Clone + Serialize> MemoryCache<T> {
    // == Constructors ==
    /// Creates a cache with LRU eviction and the serde-based size estimator.
    pub fn new(max_entries: usize, default_ttl_ms: u64) -> Self {
        Self::with_policy(max_entries, default_ttl_ms, Box::new(LruPolicy))
    }

    /// Creates a cache with an explicit eviction policy.
    pub fn with_policy(
        max_entries: usize,
        default_ttl_ms: u64,
        policy: Box<dyn EvictionPolicy>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            stats: CacheStats::new(),
            max_entries,
            max_bytes: None,
            default_ttl_ms,
            policy,
            sizer: estimate_size::<T>,
            total_bytes: 0,
        }
    }

    /// Sets an aggregate byte budget enforced on insertion.
    pub fn with_byte_budget(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Replaces the size estimator (e.g. [`string_size`] for string values).
    pub fn with_sizer(mut self, sizer: fn(&T) -> usize) -> Self {
        self.sizer = sizer;
        self
    }

    // == Set ==
    /// Stores a key-value pair with optional TTL in milliseconds.
    ///
    /// Overwriting replaces the entry and its byte accounting. When the
    /// cache is at its entry ceiling, or a configured byte budget would be
    /// exceeded, victims chosen by the eviction policy are removed first.
    pub fn set(&mut self, key: String, value: T, ttl_ms: Option<u64>) {
        let size_bytes = (self.sizer)(&value);

        // Overwrite replaces accounting entirely
        if let Some(old) = self.entries.remove(&key) {
            self.total_bytes = self.total_bytes.saturating_sub(old.size_bytes);
        }

        self.make_room(size_bytes);

        let ttl = ttl_ms.unwrap_or(self.default_ttl_ms);
        self.entries
            .insert(key, CacheEntry::new(value, ttl, size_bytes));
        self.total_bytes += size_bytes;
        self.sync_usage();
    }

    /// Evicts until the policy is satisfied with the available room.
    ///
    /// Policies returning one victim per call (nearest-to-expiry) are
    /// re-invoked until they stop selecting; the LRU policy frees its
    /// headroom in a single pass.
    fn make_room(&mut self, incoming_bytes: usize) {
        loop {
            let ctx = EvictionContext {
                max_entries: self.max_entries,
                max_bytes: self.max_bytes,
                total_bytes: self.total_bytes,
                incoming_bytes,
            };
            let metas: Vec<EntryMeta<'_>> = self
                .entries
                .iter()
                .map(|(key, entry)| EntryMeta {
                    key,
                    expires_at: entry.expires_at,
                    last_accessed_at: entry.last_accessed_at,
                    size_bytes: entry.size_bytes,
                })
                .collect();

            let victims = self.policy.select_victims(&metas, &ctx);
            if victims.is_empty() {
                break;
            }
            for key in victims {
                if let Some(entry) = self.entries.remove(&key) {
                    self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
                    self.stats.record_eviction();
                }
            }
        }
    }

    // == Get ==
    /// Retrieves a live value by key.
    ///
    /// Expired entries are deleted as a side effect and count as misses.
    /// Under a recency-tracking policy the entry's access time is refreshed.
    pub fn get(&mut self, key: &str) -> Option<T> {
        if self.remove_if_expired(key) {
            self.stats.record_miss();
            return None;
        }

        let tracks_recency = self.policy.tracks_recency();
        match self.entries.get_mut(key) {
            Some(entry) => {
                if tracks_recency {
                    entry.touch();
                }
                let value = entry.value.clone();
                self.stats.record_hit();
                Some(value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    // == Has ==
    /// Existence check with the same expiry semantics as `get`, without
    /// mutating statistics or recency.
    pub fn has(&mut self, key: &str) -> bool {
        if self.remove_if_expired(key) {
            return false;
        }
        self.entries.contains_key(key)
    }

    /// Deletes the entry when lazily discovered expired. Returns true if
    /// an expired entry was removed.
    fn remove_if_expired(&mut self, key: &str) -> bool {
        let expired = self
            .entries
            .get(key)
            .map(|entry| entry.is_expired())
            .unwrap_or(false);
        if expired {
            self.remove_entry(key);
        }
        expired
    }

    // == Delete ==
    /// Removes an entry by key. Returns true if it existed.
    pub fn delete(&mut self, key: &str) -> bool {
        self.remove_entry(key)
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
                self.sync_usage();
                true
            }
            None => false,
        }
    }

    // == Delete Pattern ==
    /// Deletes every key matching the pattern, returning the number removed.
    ///
    /// Used to invalidate a whole namespace, e.g. `^user:`.
    pub fn delete_pattern(&mut self, pattern: &Regex) -> usize {
        let matching: Vec<String> = self
            .entries
            .keys()
            .filter(|key| pattern.is_match(key))
            .cloned()
            .collect();

        let count = matching.len();
        for key in matching {
            self.remove_entry(&key);
        }
        count
    }

    // == Clear ==
    /// Removes all entries and resets statistics.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
        self.stats.reset();
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_usage(self.entries.len(), self.total_bytes);
        stats
    }

    // == Cleanup Expired ==
    /// Removes all expired entries, independent of access patterns.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        let count = expired_keys.len();
        for key in expired_keys {
            self.remove_entry(&key);
        }
        count
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sync_usage(&mut self) {
        let entries = self.entries.len();
        let bytes = self.total_bytes;
        self.stats.set_usage(entries, bytes);
    }
}
