//! In-memory TTL cache with namespace invalidation and a hard entry bound.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tierload_core::{elapsed_between, Clock, SystemClock};

use super::freshness::CacheRead;
use super::traits::{CacheStats, CacheStore};
use crate::persist::PersistedRecord;

/// Composite identity of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub namespace: String,
    pub key: String,
}

impl CacheKey {
    pub fn new(key: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }
}

/// A stored value and its expiry metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub stored_at: DateTime<Utc>,
    pub ttl: Duration,
    pub namespace: String,
}

impl<V> CacheEntry<V> {
    /// An entry is logically absent once `now - stored_at > ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        elapsed_between(self.stored_at, now) > self.ttl
    }
}

struct Slot<V> {
    entry: CacheEntry<V>,
    /// Position in set order; the smallest live sequence is evicted first.
    seq: u64,
}

struct Inner<V> {
    entries: HashMap<CacheKey, Slot<V>>,
    set_order: BTreeMap<u64, CacheKey>,
    next_seq: u64,
    stats: CacheStats,
}

impl<V> Inner<V> {
    fn remove(&mut self, key: &CacheKey) -> Option<Slot<V>> {
        let slot = self.entries.remove(key)?;
        self.set_order.remove(&slot.seq);
        Some(slot)
    }

    fn evict_oldest(&mut self) -> Option<CacheKey> {
        let (_, key) = self.set_order.pop_first()?;
        self.entries.remove(&key);
        self.stats.evictions += 1;
        Some(key)
    }
}

/// Bounded in-memory TTL cache.
///
/// Expiry is checked lazily against the injected [`Clock`]; there is no
/// background sweeper. When full, `set` evicts the least-recently-set entry.
/// All access goes through one mutex, so a cache can be shared across tasks
/// and threads behind an `Arc`.
pub struct TtlCache<V> {
    inner: Mutex<Inner<V>>,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl<V: Clone + Send> TtlCache<V> {
    /// Create a cache holding at most `max_entries` entries.
    pub fn new(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                set_order: BTreeMap::new(),
                next_seq: 0,
                stats: CacheStats::default(),
            }),
            max_entries: max_entries.max(1),
            clock,
        }
    }

    /// Create a cache using the system clock.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self::new(max_entries, Arc::new(SystemClock))
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Statistics are kept.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.set_order.clear();
    }

    /// Keys currently stored in `namespace`, in set order.
    pub fn keys_in(&self, namespace: &str) -> Vec<String> {
        let inner = self.lock();
        inner
            .set_order
            .values()
            .filter(|k| k.namespace == namespace)
            .map(|k| k.key.clone())
            .collect()
    }

    /// Snapshot of every entry as persistable records, in set order.
    pub fn export_records(&self) -> Vec<PersistedRecord<V>> {
        let inner = self.lock();
        inner
            .set_order
            .values()
            .filter_map(|k| inner.entries.get(k))
            .map(|slot| PersistedRecord::from_entry(&slot.entry))
            .collect()
    }

    /// Load records, skipping those already expired. Returns the number
    /// imported. Records are applied in order, so later duplicates win.
    pub fn import_records(&self, records: Vec<PersistedRecord<V>>) -> usize {
        let now = self.clock.now();
        let mut imported = 0;
        for record in records {
            let entry = record.into_entry();
            if entry.is_expired(now) {
                continue;
            }
            self.insert_entry(entry);
            imported += 1;
        }
        imported
    }

    fn insert_entry(&self, entry: CacheEntry<V>) {
        let key = CacheKey::new(entry.key.clone(), entry.namespace.clone());
        let mut inner = self.lock();
        let replacing = inner.remove(&key).is_some();
        if !replacing {
            while inner.entries.len() >= self.max_entries {
                match inner.evict_oldest() {
                    Some(evicted) => {
                        tracing::debug!(
                            namespace = %evicted.namespace,
                            key = %evicted.key,
                            "Evicted least-recently-set cache entry"
                        );
                    }
                    None => break,
                }
            }
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.set_order.insert(seq, key.clone());
        inner.entries.insert(key, Slot { entry, seq });
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: Clone + Send> CacheStore<V> for TtlCache<V> {
    fn get(&self, key: &str, namespace: &str) -> Option<CacheRead<V>> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let found = inner
            .entries
            .get(&CacheKey::new(key, namespace))
            .filter(|slot| !slot.entry.is_expired(now))
            .map(|slot| {
                let e = &slot.entry;
                CacheRead::new(e.value.clone(), e.stored_at, e.ttl, false)
            });
        match found {
            Some(_) => inner.stats.hits += 1,
            None => inner.stats.misses += 1,
        }
        found
    }

    fn get_stale(&self, key: &str, namespace: &str) -> Option<CacheRead<V>> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let found = inner.entries.get(&CacheKey::new(key, namespace)).map(|slot| {
            let e = &slot.entry;
            CacheRead::new(e.value.clone(), e.stored_at, e.ttl, e.is_expired(now))
        });
        if found.as_ref().is_some_and(CacheRead::is_expired) {
            inner.stats.stale_hits += 1;
        }
        found
    }

    fn set(&self, key: &str, value: V, namespace: &str, ttl: Duration) {
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            stored_at: self.clock.now(),
            ttl,
            namespace: namespace.to_string(),
        };
        self.insert_entry(entry);
    }

    fn delete(&self, key: &str, namespace: &str) -> bool {
        self.lock().remove(&CacheKey::new(key, namespace)).is_some()
    }

    fn invalidate_namespace(&self, namespace: &str) -> usize {
        let mut inner = self.lock();
        let doomed: Vec<CacheKey> = inner
            .entries
            .keys()
            .filter(|k| k.namespace == namespace)
            .cloned()
            .collect();
        for key in &doomed {
            inner.remove(key);
        }
        if !doomed.is_empty() {
            tracing::debug!(namespace, removed = doomed.len(), "Invalidated cache namespace");
        }
        doomed.len()
    }

    fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let doomed: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            inner.remove(key);
        }
        doomed.len()
    }

    fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entry_count: inner.entries.len() as u64,
            ..inner.stats.clone()
        }
    }
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self
            .inner
            .lock()
            .map(|inner| inner.entries.len())
            .unwrap_or_default();
        f.debug_struct("TtlCache")
            .field("len", &len)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierload_core::ManualClock;

    fn cache(max: usize) -> (TtlCache<i32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (TtlCache::new(max, clock.clone()), clock)
    }

    const TTL: Duration = Duration::from_secs(15);

    #[test]
    fn test_get_after_set() {
        let (cache, _) = cache(10);
        cache.set("k", 7, "critical", TTL);
        let read = cache.get("k", "critical").expect("fresh entry");
        assert_eq!(*read.value(), 7);
        assert!(!read.is_expired());
    }

    #[test]
    fn test_get_unknown_is_none() {
        let (cache, _) = cache(10);
        assert!(cache.get("missing", "critical").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let (cache, _) = cache(10);
        cache.set("k", 1, "critical", TTL);
        cache.set("k", 2, "secondary", TTL);
        assert_eq!(cache.get("k", "critical").map(CacheRead::into_value), Some(1));
        assert_eq!(cache.get("k", "secondary").map(CacheRead::into_value), Some(2));
    }

    #[test]
    fn test_expiry_boundary() {
        let (cache, clock) = cache(10);
        cache.set("k", 1, "critical", TTL);

        clock.advance(TTL);
        assert!(cache.get("k", "critical").is_some(), "exactly ttl is still fresh");

        clock.advance(Duration::from_millis(1));
        assert!(cache.get("k", "critical").is_none());
    }

    #[test]
    fn test_expired_entry_still_readable_as_stale() {
        let (cache, clock) = cache(10);
        cache.set("k", 1, "critical", TTL);
        clock.advance(TTL + Duration::from_secs(1));

        let stale = cache.get_stale("k", "critical").expect("stale entry");
        assert!(stale.is_expired());
        assert_eq!(stale.into_value(), 1);
        assert_eq!(cache.stats().stale_hits, 1);
    }

    #[test]
    fn test_set_resets_expiry() {
        let (cache, clock) = cache(10);
        cache.set("k", 1, "critical", TTL);
        clock.advance(Duration::from_secs(10));
        cache.set("k", 2, "critical", TTL);
        clock.advance(Duration::from_secs(10));

        let read = cache.get("k", "critical").expect("refreshed entry");
        assert_eq!(read.into_value(), 2);
    }

    #[test]
    fn test_evicts_least_recently_set() {
        let (cache, _) = cache(2);
        cache.set("a", 1, "ns", TTL);
        cache.set("b", 2, "ns", TTL);
        // Overwriting `a` makes `b` the oldest set.
        cache.set("a", 3, "ns", TTL);
        cache.set("c", 4, "ns", TTL);

        assert!(cache.get("b", "ns").is_none());
        assert!(cache.get("a", "ns").is_some());
        assert!(cache.get("c", "ns").is_some());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_invalidate_namespace() {
        let (cache, _) = cache(10);
        cache.set("a", 1, "critical", TTL);
        cache.set("b", 2, "critical", TTL);
        cache.set("a", 3, "detailed", TTL);

        assert_eq!(cache.invalidate_namespace("critical"), 2);
        assert!(cache.get("a", "critical").is_none());
        assert!(cache.get("a", "detailed").is_some());
        assert_eq!(cache.invalidate_namespace("critical"), 0);
    }

    #[test]
    fn test_delete() {
        let (cache, _) = cache(10);
        cache.set("a", 1, "ns", TTL);
        assert!(cache.delete("a", "ns"));
        assert!(!cache.delete("a", "ns"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_expired() {
        let (cache, clock) = cache(10);
        cache.set("short", 1, "ns", Duration::from_secs(1));
        cache.set("long", 2, "ns", Duration::from_secs(60));
        clock.advance(Duration::from_secs(5));

        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.keys_in("ns"), vec!["long".to_string()]);
    }

    #[test]
    fn test_import_skips_expired_records() {
        let (source, clock) = cache(10);
        source.set("short", 1, "ns", Duration::from_secs(1));
        source.set("long", 2, "ns", Duration::from_secs(60));
        let records = source.export_records();
        assert_eq!(records.len(), 2);

        clock.advance(Duration::from_secs(5));
        let target = TtlCache::new(10, clock.clone());
        assert_eq!(target.import_records(records), 1);
        assert_eq!(target.get("long", "ns").map(CacheRead::into_value), Some(2));
    }
}
