use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tierload_core::ManualClock;
use tierload_storage::{load_records, save_records, CacheRead, CacheStore, TtlCache};

fn cache(max: usize) -> (TtlCache<u32>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    (TtlCache::new(max, clock.clone()), clock)
}

#[test]
fn snapshot_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.jsonl");
    let (warm, clock) = cache(10);
    warm.set("critical", 1, "critical", Duration::from_secs(15));
    warm.set("secondary", 2, "secondary", Duration::from_secs(60));
    save_records(&path, &warm.export_records()).expect("save");

    clock.advance(Duration::from_secs(30));
    let cold = TtlCache::new(10, clock.clone());
    let imported = cold.import_records(load_records(&path).expect("load"));

    assert_eq!(imported, 1);
    assert!(cold.get("critical", "critical").is_none());
    assert_eq!(
        cold.get("secondary", "secondary").map(CacheRead::into_value),
        Some(2)
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn read_after_set_returns_value_until_ttl(
        value in any::<u32>(),
        ttl_ms in 1u64..60_000,
        elapsed_ms in 0u64..120_000,
    ) {
        let (cache, clock) = cache(4);
        cache.set("k", value, "ns", Duration::from_millis(ttl_ms));
        clock.advance(Duration::from_millis(elapsed_ms));

        let read = cache.get("k", "ns");
        if elapsed_ms <= ttl_ms {
            prop_assert_eq!(read.map(CacheRead::into_value), Some(value));
        } else {
            prop_assert!(read.is_none());
            let stale = cache.get_stale("k", "ns");
            prop_assert!(stale.as_ref().is_some_and(CacheRead::is_expired));
        }
    }

    #[test]
    fn never_exceeds_max_entries(
        max in 1usize..8,
        keys in prop::collection::vec("[a-e]{1,2}", 1..40),
    ) {
        let (cache, _) = cache(max);
        for (i, key) in keys.iter().enumerate() {
            cache.set(key, i as u32, "ns", Duration::from_secs(60));
            prop_assert!(cache.len() <= max);
        }
        // The most recent write is always retained.
        let last = keys.last().expect("non-empty");
        prop_assert_eq!(
            cache.get(last, "ns").map(CacheRead::into_value),
            Some(keys.len() as u32 - 1)
        );
    }

    #[test]
    fn invalidation_only_touches_its_namespace(
        keys in prop::collection::btree_set("[a-z]{1,4}", 1..10),
    ) {
        let (cache, _) = cache(64);
        for key in &keys {
            cache.set(key, 1, "critical", Duration::from_secs(60));
            cache.set(key, 2, "detailed", Duration::from_secs(60));
        }

        prop_assert_eq!(cache.invalidate_namespace("critical"), keys.len());
        for key in &keys {
            prop_assert!(cache.get(key, "critical").is_none());
            prop_assert_eq!(cache.get(key, "detailed").map(CacheRead::into_value), Some(2));
        }
    }
}
