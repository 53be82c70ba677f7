//! Eviction Policy Module
//!
//! Pluggable victim selection for the cache store. The store stays
//! policy-agnostic; policies only see entry metadata and capacity context.

// == Entry Metadata ==
/// Read-only view of one entry's bookkeeping, handed to policies.
#[derive(Debug, Clone)]
pub struct EntryMeta<'a> {
    /// The entry's key
    pub key: &'a str,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at: u64,
    /// Last access timestamp (Unix milliseconds)
    pub last_accessed_at: u64,
    /// Estimated value size in bytes
    pub size_bytes: usize,
}

// == Eviction Context ==
/// Capacity situation at the moment an insert needs room.
#[derive(Debug, Clone)]
pub struct EvictionContext {
    /// Maximum number of entries the cache may hold
    pub max_entries: usize,
    /// Optional aggregate byte budget
    pub max_bytes: Option<usize>,
    /// Current aggregate bytes across live entries
    pub total_bytes: usize,
    /// Size of the value about to be inserted
    pub incoming_bytes: usize,
}

// == Eviction Policy Trait ==
/// Selects which keys to evict so an insert can proceed.
///
/// Returned keys are removed by the store in order; every removal counts
/// as one eviction in the statistics.
pub trait EvictionPolicy: Send + Sync + std::fmt::Debug {
    /// Picks victim keys given the current entries and capacity context.
    fn select_victims(&self, entries: &[EntryMeta<'_>], ctx: &EvictionContext) -> Vec<String>;

    /// Whether the store should refresh `last_accessed_at` on reads.
    fn tracks_recency(&self) -> bool {
        false
    }
}

// == LRU Policy ==
/// Evicts least-recently-used entries until both the entry count and the
/// byte total (when budgeted) fall strictly below ~90% of their ceilings,
/// so one eviction pass creates slack instead of freeing a single slot.
#[derive(Debug, Default)]
pub struct LruPolicy;

const HEADROOM: f64 = 0.9;

impl EvictionPolicy for LruPolicy {
    fn select_victims(&self, entries: &[EntryMeta<'_>], ctx: &EvictionContext) -> Vec<String> {
        let mut by_recency: Vec<&EntryMeta<'_>> = entries.iter().collect();
        by_recency.sort_by_key(|meta| meta.last_accessed_at);

        let entry_target = ctx.max_entries as f64 * HEADROOM;
        let byte_target = ctx.max_bytes.map(|max| max as f64 * HEADROOM);

        let mut remaining = entries.len();
        let mut remaining_bytes = ctx.total_bytes;
        let mut victims = Vec::new();

        for meta in by_recency {
            let over_count = remaining as f64 >= entry_target;
            let over_bytes = byte_target
                .map(|target| (remaining_bytes + ctx.incoming_bytes) as f64 >= target)
                .unwrap_or(false);
            if !over_count && !over_bytes {
                break;
            }
            victims.push(meta.key.to_string());
            remaining -= 1;
            remaining_bytes = remaining_bytes.saturating_sub(meta.size_bytes);
        }

        victims
    }

    fn tracks_recency(&self) -> bool {
        true
    }
}

// == Nearest-Expiry Policy ==
/// Evicts the single entry closest to expiring, one per overflow.
#[derive(Debug, Default)]
pub struct NearestExpiryPolicy;

impl EvictionPolicy for NearestExpiryPolicy {
    fn select_victims(&self, entries: &[EntryMeta<'_>], ctx: &EvictionContext) -> Vec<String> {
        let over_count = entries.len() >= ctx.max_entries;
        let over_bytes = ctx
            .max_bytes
            .map(|max| ctx.total_bytes + ctx.incoming_bytes > max)
            .unwrap_or(false);
        if !over_count && !over_bytes {
            return Vec::new();
        }

        entries
            .iter()
            .min_by_key(|meta| meta.expires_at)
            .map(|meta| vec![meta.key.to_string()])
            .unwrap_or_default()
    }
}
