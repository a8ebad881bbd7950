//! Cache store trait and statistics.

use super::freshness::CacheRead;
use std::time::Duration;

/// Key/value store with per-entry TTL and namespace invalidation.
///
/// The loader only talks to the cache through this trait, so a persistent
/// or shared store can replace the in-memory [`TtlCache`](super::TtlCache).
///
/// # Contract
///
/// - `get` never fails; an expired or unknown entry reads as `None`
/// - `set` overwrites unconditionally and restarts the expiry clock
/// - expiry is evaluated lazily on read; expired entries stay readable
///   through `get_stale` until overwritten, swept, evicted, or invalidated
pub trait CacheStore<V>: Send + Sync {
    /// Fresh entry for `key` in `namespace`.
    fn get(&self, key: &str, namespace: &str) -> Option<CacheRead<V>>;

    /// Entry for `key` regardless of expiry, flagged via `is_expired`.
    fn get_stale(&self, key: &str, namespace: &str) -> Option<CacheRead<V>>;

    /// Store `value`, replacing any existing entry.
    fn set(&self, key: &str, value: V, namespace: &str, ttl: Duration);

    /// Remove one entry. Returns whether it existed.
    fn delete(&self, key: &str, namespace: &str) -> bool;

    /// Remove every entry in `namespace`. Returns the number removed.
    fn invalidate_namespace(&self, namespace: &str) -> usize;

    /// Remove every expired entry. Returns the number removed.
    fn sweep_expired(&self) -> usize;

    fn stats(&self) -> CacheStats;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that found a fresh entry.
    pub hits: u64,
    /// Reads that found nothing usable.
    pub misses: u64,
    /// Stale reads that returned an expired entry.
    pub stale_hits: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
