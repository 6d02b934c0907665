//! Property-based tests for the cache and sync invariants.
//!
//! Generates random entries, payloads and write sequences and checks the
//! bounds that must hold for any input.
//!
//! Run with: `cargo test --test proptest_invariants`

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;

use birch_offline::cache::compression::{estimate_ratio, MIN_RATIO};
use birch_offline::cache::history::AccessHistory;
use birch_offline::cache::priority::PriorityPolicy;
use birch_offline::record::DomainSignals;
use birch_offline::resilience::retry::{backoff_delay, MAX_BACKOFF};
use birch_offline::sync::batch::create_optimized_batches;
use birch_offline::{
    CacheConfig, CacheEngine, CacheEntry, CacheKey, DomainRecord, EntityPayload, EntityType, NetworkCondition,
    NetworkCost, NetworkSpeed, PersistentStore, QueueItemDraft, SyncConfig, SyncOperation, SyncPriority, SyncStatus,
};

const NOW: i64 = 1_700_000_000_000;

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn entry_strategy() -> impl Strategy<Value = CacheEntry> {
    (
        0i64..(90 * 24 * 3600),       // idle seconds
        0u64..10_000,                  // access count
        any::<bool>(),                 // favorite
        prop_oneof![Just(0u64), 0u64..1_000, Just(u64::MAX)], // times ordered
        any::<bool>(),                 // pinned
    )
        .prop_map(|(idle, accesses, favorite, times_ordered, pinned)| {
            let payload = EntityPayload::from_json(EntityType::Recipe, json!({"id": "r"})).unwrap();
            let mut entry = CacheEntry::from_record(&DomainRecord::new(payload, SyncStatus::Synced));
            entry.last_accessed = NOW - idle * 1000;
            entry.access_count = accesses;
            entry.signals = DomainSignals { favorite, times_ordered };
            entry.pinned = pinned;
            entry
        })
}

fn status_strategy() -> impl Strategy<Value = SyncStatus> {
    prop_oneof![
        Just(SyncStatus::Synced),
        Just(SyncStatus::Pending),
        Just(SyncStatus::Conflict),
    ]
}

fn priority_strategy() -> impl Strategy<Value = SyncPriority> {
    prop_oneof![
        Just(SyncPriority::Low),
        Just(SyncPriority::Normal),
        Just(SyncPriority::High),
        Just(SyncPriority::Critical),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// =============================================================================
// Cache invariants
// =============================================================================

proptest! {
    #[test]
    fn priority_always_in_unit_interval(entry in entry_strategy(), half_life in 1.0f64..1e7) {
        let policy = PriorityPolicy {
            recency_half_life: half_life,
            ..PriorityPolicy::default()
        };
        let score = policy.score(&entry, NOW);
        prop_assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
        if entry.pinned {
            prop_assert_eq!(score, 1.0);
        }
    }

    #[test]
    fn priority_ignores_future_access_times(entry in entry_strategy(), skew in 1i64..1_000_000) {
        let mut future = entry.clone();
        future.last_accessed = NOW + skew;
        let score = PriorityPolicy::default().score(&future, NOW);
        prop_assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn compression_ratio_is_bounded(bytes in prop::collection::vec(any::<u8>(), 0..8192)) {
        let ratio = estimate_ratio(&bytes);
        prop_assert!(ratio >= MIN_RATIO && ratio <= 1.0, "ratio {} out of range", ratio);
    }

    #[test]
    fn repetitive_payload_ratio_is_bounded(unit in "[a-z]{1,8}", repeats in 1usize..2000) {
        let ratio = estimate_ratio(unit.repeat(repeats).as_bytes());
        prop_assert!(ratio >= MIN_RATIO && ratio <= 1.0);
    }

    #[test]
    fn history_never_exceeds_cap(cap in 1usize..200, accesses in 0usize..1000) {
        let mut history = AccessHistory::new(cap);
        for i in 0..accesses {
            history.push(CacheKey::new(EntityType::Recipe, format!("r{}", i % 17)), NOW + i as i64);
            prop_assert!(history.len() <= cap);
        }
        prop_assert_eq!(history.len(), accesses.min(cap));

        // Oldest dropped first
        let snapshot = history.snapshot();
        prop_assert!(snapshot.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn disabled_compression_reports_exactly_one(names in prop::collection::vec("[a-z ]{0,400}", 1..12)) {
        runtime().block_on(async {
            let store = Arc::new(PersistentStore::new(None));
            store.initialize().await.unwrap();
            let cache = CacheEngine::new(store.clone(), CacheConfig {
                compression: false,
                ..Default::default()
            });
            for (i, name) in names.iter().enumerate() {
                store
                    .cache_recipe(json!({"id": format!("r{i}"), "name": name}), SyncStatus::Synced)
                    .await
                    .unwrap();
            }
            cache.force_optimization().await;

            let entries = cache.get_cache_entries();
            assert_eq!(entries.len(), names.len());
            for entry in entries {
                assert_eq!(entry.compression_ratio, 1.0);
            }
        });
    }

    #[test]
    fn last_synced_at_never_moves_backwards(statuses in prop::collection::vec(status_strategy(), 1..20)) {
        runtime().block_on(async {
            let store = PersistentStore::new(None);
            store.initialize().await.unwrap();

            let mut previous: Option<i64> = None;
            let mut previous_status: Option<SyncStatus> = None;
            for (i, status) in statuses.into_iter().enumerate() {
                let payload = EntityPayload::from_json(
                    EntityType::Ingredient,
                    json!({"id": "i1", "revision": i}),
                )
                .unwrap();
                let record = store.cache_record(payload, status).await.unwrap();
                match (previous, record.last_synced_at) {
                    (Some(before), Some(after)) => assert!(after >= before),
                    (Some(_), None) => panic!("last_synced_at was cleared"),
                    _ => {}
                }
                // A synced write onto an unsynced record leaves it as it was
                if record.sync_status == SyncStatus::Synced {
                    assert!(record.last_synced_at.is_some());
                }
                if status == SyncStatus::Synced && previous_status.is_some_and(|p| p != SyncStatus::Synced) {
                    assert_eq!(record.sync_status, previous_status.unwrap());
                }
                previous_status = Some(record.sync_status);
                previous = record.last_synced_at;
            }
        });
    }
}

// =============================================================================
// Sync invariants
// =============================================================================

proptest! {
    #[test]
    fn backoff_is_monotonic_and_capped(base_ms in 0u64..10_000, multiplier in 0.5f64..4.0, retries in 0u32..80) {
        let base = Duration::from_millis(base_ms);
        let current = backoff_delay(base, multiplier, retries);
        let next = backoff_delay(base, multiplier, retries + 1);
        prop_assert!(next >= current);
        prop_assert!(next <= MAX_BACKOFF);
    }

    #[test]
    fn batches_cover_every_item_in_priority_order(
        specs in prop::collection::vec((priority_strategy(), 0usize..200_000), 0..40),
        slow in any::<bool>(),
    ) {
        let network = if slow {
            NetworkCondition::default().with_speed(NetworkSpeed::Slow).with_cost(NetworkCost::Metered)
        } else {
            NetworkCondition::default().with_speed(NetworkSpeed::Fast)
        };
        let items: Vec<_> = specs
            .iter()
            .enumerate()
            .map(|(i, (priority, size))| {
                let payload = EntityPayload::from_json(
                    EntityType::Recipe,
                    json!({"id": format!("r{i}"), "notes": "n".repeat(*size)}),
                )
                .unwrap();
                QueueItemDraft::new(SyncOperation::Update, payload)
                    .priority(*priority)
                    .build(&SyncConfig::default())
            })
            .collect();

        let batches = create_optimized_batches(items, &network);

        let total: usize = batches.iter().map(|b| b.len()).sum();
        prop_assert_eq!(total, specs.len());
        prop_assert!(batches.iter().all(|b| !b.is_empty()));
        prop_assert!(batches.windows(2).all(|w| w[0].priority >= w[1].priority));
        for batch in &batches {
            prop_assert!(batch.items.iter().all(|item| item.priority == batch.priority));
            if batch.len() > 1 {
                prop_assert!(batch.total_size <= network.optimal_batch_size());
            }
        }
    }
}
