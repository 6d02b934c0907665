// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The cache engine: a priority-ranked residency index over the store.
//!
//! # Structure
//!
//! - **Index** (`DashMap<CacheKey, CacheEntry>`): one entry per stored
//!   record. Kept in step with the store on existence through
//!   [`StoreObserver`]; only priority metadata may lag.
//! - **Warm set**: a small set of hot record bodies served by
//!   [`super::TrackedStore`] without a store read. Hits and misses are
//!   counted against it.
//! - **Access history**: bounded ring buffer used for prefetch.
//!
//! # Eviction
//!
//! Utilization is the larger of bytes-used and entries-used as a fraction of
//! the configured limits. Once it crosses the high-water mark an
//! optimization pass (automatic, or via [`CacheEngine::optimize_cache`])
//! evicts victims in strategy order until the pressure level's target is
//! met. Only synced, unpinned records are candidates, and each is re-checked
//! against the store right before deletion. A record still targeted by a
//! queue item is skipped. A failed eviction is logged and skipped.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::compression::{self, CompressionStats};
use super::entry::{CacheEntry, CacheKey};
use super::history::{AccessHistory, AccessRecord};
use super::priority::PriorityPolicy;
use super::strategy::CacheStrategy;
use crate::config::CacheConfig;
use crate::error::{ConfigurationError, EvictionError};
use crate::pressure::CachePressure;
use crate::record::{now_millis, DomainRecord, EntityType, SyncStatus};
use crate::storage::persistent::{StorageStats, StoreObserver};
use crate::storage::traits::StorageError;
use crate::storage::PersistentStore;

/// Hot record bodies kept in memory.
pub const WARM_CAPACITY: usize = 256;

/// Co-accessed items fetched per prefetch.
const PREFETCH_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TypeCacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub stale: usize,
    pub pinned: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheHealth {
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub staleness_rate: f64,
    pub utilization_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    /// Effective bytes (after estimated compression, when enabled)
    pub total_bytes: usize,
    pub by_type: BTreeMap<EntityType, TypeCacheStats>,
    pub health: CacheHealth,
    pub strategy: CacheStrategy,
    /// Present only with compression enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_stats: Option<CompressionStats>,
    pub storage: StorageStats,
}

/// Outcome of one optimization pass.
#[derive(Debug, Clone, Default)]
pub struct OptimizationReport {
    pub evicted: Vec<CacheKey>,
    pub failed: usize,
    pub bytes_freed: usize,
    pub utilization_before: f64,
    pub utilization_after: f64,
}

impl OptimizationReport {
    fn idle(utilization: f64) -> Self {
        Self {
            utilization_before: utilization,
            utilization_after: utilization,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CacheUsage {
    bytes: usize,
    entries: usize,
}

impl CacheUsage {
    fn utilization(&self, config: &CacheConfig) -> f64 {
        let by_bytes = self.bytes as f64 / config.max_cache_size.max(1) as f64;
        let by_entries = self.entries as f64 / config.max_entries.max(1) as f64;
        by_bytes.max(by_entries)
    }
}

enum EvictOutcome {
    Evicted,
    /// Already gone from the store
    Vanished,
    /// Became unevictable since the snapshot
    Skipped,
}

fn effective_bytes(entry: &CacheEntry, compression: bool) -> usize {
    if compression {
        (entry.size_bytes as f64 * entry.compression_ratio).round() as usize
    } else {
        entry.size_bytes
    }
}

fn estimate_record_ratio(record: &DomainRecord) -> f64 {
    let bytes = serde_json::to_vec(record.payload.data()).unwrap_or_default();
    let ratio = compression::estimate_ratio(&bytes);
    crate::metrics::record_compression_ratio(ratio);
    ratio
}

pub struct CacheEngine {
    store: Arc<PersistentStore>,
    config: RwLock<CacheConfig>,
    policy: PriorityPolicy,
    entries: DashMap<CacheKey, CacheEntry>,
    warm: DashMap<CacheKey, DomainRecord>,
    history: Mutex<AccessHistory>,
    hits: AtomicU64,
    misses: AtomicU64,
    predictive: AtomicBool,
    auto_optimize_pending: AtomicBool,
    /// Sum of `size_bytes` over the index. Upper bound on effective bytes.
    raw_bytes: AtomicUsize,
    optimize_lock: tokio::sync::Mutex<()>,
    self_ref: Weak<CacheEngine>,
}

impl CacheEngine {
    /// Build the engine and register it as an observer of `store`.
    pub fn new(store: Arc<PersistentStore>, config: CacheConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let observer: Weak<dyn StoreObserver> = weak.clone();
            store.register_observer(observer);
            Self {
                policy: PriorityPolicy::default().with_stale_after(config.stale_after_ms),
                history: Mutex::new(AccessHistory::new(config.history_cap)),
                predictive: AtomicBool::new(config.predictive),
                config: RwLock::new(config),
                store,
                entries: DashMap::new(),
                warm: DashMap::new(),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                auto_optimize_pending: AtomicBool::new(false),
                raw_bytes: AtomicUsize::new(0),
                optimize_lock: tokio::sync::Mutex::new(()),
                self_ref: weak.clone(),
            }
        })
    }

    #[must_use]
    pub fn config(&self) -> CacheConfig {
        self.config.read().clone()
    }

    #[must_use]
    pub fn policy(&self) -> &PriorityPolicy {
        &self.policy
    }

    /// Rebuild the index from the store. Access stats and pinning survive
    /// for records that are still present. Returns the entry count.
    #[tracing::instrument(skip(self))]
    pub async fn load_cache_metadata(&self) -> Result<usize, StorageError> {
        let compression = self.config.read().compression;
        let now = now_millis();

        let mut fresh: Vec<CacheEntry> = Vec::new();
        for entity_type in EntityType::ALL {
            for record in self.store.get_cached(entity_type).await? {
                let key = CacheKey::of(&record);
                let mut entry = match self.entries.get(&key) {
                    Some(existing) => {
                        let mut e = existing.value().clone();
                        e.refresh_from(&record);
                        e
                    }
                    None => CacheEntry::from_record(&record),
                };
                if compression {
                    let ratio = estimate_record_ratio(&record);
                    entry.estimated_ratio = Some(ratio);
                    entry.compression_ratio = ratio;
                }
                self.policy.refresh(&mut entry, now);
                fresh.push(entry);
            }
        }

        let live: std::collections::HashSet<CacheKey> = fresh.iter().map(|e| e.key.clone()).collect();
        self.entries.retain(|k, _| live.contains(k));
        self.warm.retain(|k, _| live.contains(k));
        for entry in fresh {
            self.entries.insert(entry.key.clone(), entry);
        }
        let raw: usize = self.entries.iter().map(|e| e.value().size_bytes).sum();
        self.raw_bytes.store(raw, Ordering::Relaxed);

        let count = self.entries.len();
        self.update_gauges();
        info!(entries = count, "Cache metadata loaded");
        Ok(count)
    }

    /// Note an access: history, access stats, priority, optional prefetch.
    pub fn record_access(&self, entity_type: EntityType, id: &str) {
        let key = CacheKey::new(entity_type, id);
        let now = now_millis();
        self.history.lock().push(key.clone(), now);

        if let Some(mut entry) = self.entries.get_mut(&key) {
            entry.record_access(now);
            self.policy.refresh(entry.value_mut(), now);
        }

        if self.predictive.load(Ordering::Relaxed) {
            self.prefetch(&key);
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_lookup(true);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_lookup(false);
    }

    /// Snapshot of the index, ordered by key.
    #[must_use]
    pub fn get_cache_entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    #[must_use]
    pub fn get_cache_entry(&self, entity_type: EntityType, id: &str) -> Option<CacheEntry> {
        self.entries.get(&CacheKey::new(entity_type, id)).map(|e| e.value().clone())
    }

    /// Oldest first.
    #[must_use]
    pub fn get_access_history(&self) -> Vec<AccessRecord> {
        self.history.lock().snapshot()
    }

    fn usage(&self, compression: bool) -> CacheUsage {
        let mut usage = CacheUsage::default();
        for entry in self.entries.iter() {
            usage.bytes += effective_bytes(entry.value(), compression);
            usage.entries += 1;
        }
        usage
    }

    #[must_use]
    pub fn utilization(&self) -> f64 {
        let config = self.config.read().clone();
        self.usage(config.compression).utilization(&config)
    }

    #[must_use]
    pub fn pressure(&self) -> CachePressure {
        let config = self.config.read().clone();
        CachePressure::with_high_water(self.usage(config.compression).utilization(&config), config.high_water_mark)
    }

    /// Totals, per-type breakdown and health. Store errors propagate.
    pub async fn get_cache_stats(&self) -> Result<CacheStats, StorageError> {
        let storage = self.store.get_storage_stats().await?;
        let config = self.config.read().clone();
        let now = now_millis();

        let mut by_type: BTreeMap<EntityType, TypeCacheStats> = BTreeMap::new();
        let mut usage = CacheUsage::default();
        let mut stale = 0usize;
        let mut ratios = Vec::new();
        for entry in self.entries.iter() {
            let e = entry.value();
            let bytes = effective_bytes(e, config.compression);
            let is_stale = self.policy.is_stale(e, now);
            let t = by_type.entry(e.key.entity_type).or_default();
            t.entries += 1;
            t.bytes += bytes;
            if is_stale {
                t.stale += 1;
                stale += 1;
            }
            if e.pinned {
                t.pinned += 1;
            }
            usage.bytes += bytes;
            usage.entries += 1;
            ratios.push((e.size_bytes, e.compression_ratio));
        }

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let (hit_rate, miss_rate) = if lookups == 0 {
            (0.0, 0.0)
        } else {
            (hits as f64 / lookups as f64, misses as f64 / lookups as f64)
        };

        Ok(CacheStats {
            total_entries: usage.entries,
            total_bytes: usage.bytes,
            by_type,
            health: CacheHealth {
                hit_rate,
                miss_rate,
                staleness_rate: if usage.entries == 0 { 0.0 } else { stale as f64 / usage.entries as f64 },
                utilization_rate: usage.utilization(&config),
            },
            strategy: config.strategy,
            compression_stats: config.compression.then(|| CompressionStats::from_entries(ratios)),
            storage,
        })
    }

    /// Evict down to the pressure target if above the high-water mark.
    /// Below it, only priorities and staleness are refreshed.
    #[tracing::instrument(skip(self))]
    pub async fn optimize_cache(&self) -> OptimizationReport {
        let _guard = self.optimize_lock.lock().await;
        self.run_optimization(false).await
    }

    /// Ungated pass: evicts every stale candidate, then continues down to
    /// the low-water mark regardless of the high-water trigger.
    #[tracing::instrument(skip(self))]
    pub async fn force_optimization(&self) -> OptimizationReport {
        let _guard = self.optimize_lock.lock().await;
        self.run_optimization(true).await
    }

    async fn run_optimization(&self, force: bool) -> OptimizationReport {
        let start = Instant::now();
        let config = self.config.read().clone();
        self.refresh_entries(config.compression).await;

        let usage = self.usage(config.compression);
        let utilization = usage.utilization(&config);
        let pressure = CachePressure::with_high_water(utilization, config.high_water_mark);
        crate::metrics::set_cache_pressure(pressure as u8);

        if !force && !pressure.should_optimize() {
            debug!(utilization, "Below high-water mark, nothing to evict");
            return OptimizationReport::idle(utilization);
        }

        let target = if force {
            pressure.eviction_target(config.low_water_mark).min(config.low_water_mark)
        } else {
            pressure.eviction_target(config.low_water_mark)
        };

        let now = now_millis();
        let snapshot: Vec<CacheEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        let victims = config.strategy.rank_victims(&snapshot, &self.policy, now);

        let mut report = OptimizationReport {
            utilization_before: utilization,
            ..Default::default()
        };
        let mut usage = usage;

        for victim in victims {
            let over = usage.utilization(&config) > target;
            if !over && !(force && victim.is_stale) {
                if force {
                    continue;
                }
                break;
            }

            let bytes = effective_bytes(victim, config.compression);
            match self.evict_one(victim).await {
                Ok(EvictOutcome::Evicted) => {
                    usage.bytes = usage.bytes.saturating_sub(bytes);
                    usage.entries = usage.entries.saturating_sub(1);
                    report.bytes_freed += bytes;
                    report.evicted.push(victim.key.clone());
                }
                Ok(EvictOutcome::Vanished) => {
                    usage.bytes = usage.bytes.saturating_sub(bytes);
                    usage.entries = usage.entries.saturating_sub(1);
                }
                Ok(EvictOutcome::Skipped) => {}
                Err(err) => {
                    warn!(error = %err, "Eviction failed, continuing");
                    crate::metrics::record_eviction_failure();
                    report.failed += 1;
                }
            }
        }

        report.utilization_after = usage.utilization(&config);
        crate::metrics::record_eviction(report.evicted.len(), report.bytes_freed);
        crate::metrics::record_optimization_duration(start.elapsed());
        self.update_gauges();
        info!(
            evicted = report.evicted.len(),
            failed = report.failed,
            bytes_freed = report.bytes_freed,
            before = utilization,
            after = report.utilization_after,
            strategy = %config.strategy,
            "Cache optimization complete"
        );
        report
    }

    /// Re-check the record right before deleting it.
    async fn evict_one(&self, entry: &CacheEntry) -> Result<EvictOutcome, EvictionError> {
        let key = &entry.key;
        let wrap = |source: StorageError| EvictionError { id: key.to_string(), source };

        match self.store.get_cached_record(key.entity_type, &key.id).await.map_err(wrap)? {
            None => {
                self.remove_entry(key);
                return Ok(EvictOutcome::Vanished);
            }
            Some(record) if record.sync_status != SyncStatus::Synced => {
                debug!(key = %key, status = %record.sync_status, "Skipping eviction of unsynced record");
                return Ok(EvictOutcome::Skipped);
            }
            Some(_) if self.entries.get(key).is_some_and(|e| e.pinned) => {
                return Ok(EvictOutcome::Skipped);
            }
            Some(_) => {}
        }

        if self.store.has_queued_item(key.entity_type, &key.id).await.map_err(wrap)? {
            debug!(key = %key, "Skipping eviction of record with queued sync");
            return Ok(EvictOutcome::Skipped);
        }

        self.store.delete_record(key.entity_type, &key.id).await.map_err(wrap)?;
        debug!(key = %key, "Evicted");
        Ok(EvictOutcome::Evicted)
    }

    /// Priorities, staleness and (when enabled) missing compression estimates.
    async fn refresh_entries(&self, compression: bool) {
        if compression {
            let missing: Vec<CacheKey> = self
                .entries
                .iter()
                .filter(|e| e.value().estimated_ratio.is_none())
                .map(|e| e.key().clone())
                .collect();
            for key in missing {
                match self.store.get_cached_record(key.entity_type, &key.id).await {
                    Ok(Some(record)) => {
                        let ratio = estimate_record_ratio(&record);
                        if let Some(mut entry) = self.entries.get_mut(&key) {
                            entry.estimated_ratio = Some(ratio);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!(key = %key, error = %e, "Compression estimate skipped"),
                }
            }
        }

        let now = now_millis();
        for mut entry in self.entries.iter_mut() {
            let e = entry.value_mut();
            e.compression_ratio = if compression { e.estimated_ratio.unwrap_or(1.0) } else { 1.0 };
            self.policy.refresh(e, now);
        }
    }

    pub fn enable_predictive(&self, enabled: bool) {
        self.predictive.store(enabled, Ordering::Relaxed);
        self.config.write().predictive = enabled;
    }

    pub fn set_max_cache_size(&self, bytes: usize) -> Result<(), ConfigurationError> {
        if bytes == 0 {
            return Err(ConfigurationError::invalid("cache.max_cache_size", "must be greater than zero"));
        }
        self.config.write().max_cache_size = bytes;
        Ok(())
    }

    pub fn set_max_entries(&self, entries: usize) -> Result<(), ConfigurationError> {
        if entries == 0 {
            return Err(ConfigurationError::invalid("cache.max_entries", "must be greater than zero"));
        }
        self.config.write().max_entries = entries;
        Ok(())
    }

    pub fn set_cache_strategy(&self, strategy: CacheStrategy) {
        self.config.write().strategy = strategy;
    }

    /// Takes effect on the next optimization pass.
    pub fn enable_compression(&self, enabled: bool) {
        self.config.write().compression = enabled;
    }

    /// Pin an entry so it is never evicted. Returns `false` if unknown.
    pub fn pin(&self, entity_type: EntityType, id: &str) -> bool {
        self.set_pinned(entity_type, id, true)
    }

    pub fn unpin(&self, entity_type: EntityType, id: &str) -> bool {
        self.set_pinned(entity_type, id, false)
    }

    fn set_pinned(&self, entity_type: EntityType, id: &str, pinned: bool) -> bool {
        let now = now_millis();
        match self.entries.get_mut(&CacheKey::new(entity_type, id)) {
            Some(mut entry) => {
                entry.pinned = pinned;
                self.policy.refresh(entry.value_mut(), now);
                true
            }
            None => false,
        }
    }

    /// Wipe the store, then the index, warm set, history and counters.
    #[tracing::instrument(skip(self))]
    pub async fn clear_cache(&self) -> Result<(), StorageError> {
        self.store.clear_all_data().await?;
        self.reset();
        info!("Cache cleared");
        Ok(())
    }

    fn reset(&self) {
        self.entries.clear();
        self.raw_bytes.store(0, Ordering::Relaxed);
        self.warm.clear();
        self.history.lock().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.update_gauges();
    }

    // ───────────────────────── warm set ─────────────────────────

    pub(crate) fn warm_get(&self, key: &CacheKey) -> Option<DomainRecord> {
        self.warm.get(key).map(|r| r.value().clone())
    }

    pub(crate) fn warm_insert(&self, record: DomainRecord) {
        let key = CacheKey::of(&record);
        self.warm.insert(key.clone(), record);
        if self.warm.len() <= WARM_CAPACITY {
            return;
        }
        let victim = self
            .warm
            .iter()
            .filter(|r| r.key() != &key)
            .map(|r| {
                let priority = self.entries.get(r.key()).map_or(0.0, |e| e.priority);
                (r.key().clone(), priority)
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        if let Some((victim, _)) = victim {
            self.warm.remove(&victim);
        }
    }

    #[must_use]
    pub fn warm_len(&self) -> usize {
        self.warm.len()
    }

    fn prefetch(&self, key: &CacheKey) {
        let related = self.history.lock().co_accessed(key, PREFETCH_LIMIT);
        let related: Vec<CacheKey> = related.into_iter().filter(|k| !self.warm.contains_key(k)).collect();
        if related.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak = self.self_ref.clone();
        handle.spawn(async move {
            let Some(engine) = weak.upgrade() else {
                return;
            };
            for key in related {
                match engine.store.get_cached_record(key.entity_type, &key.id).await {
                    Ok(Some(record)) => {
                        debug!(key = %key, "Prefetched");
                        engine.warm_insert(record);
                    }
                    Ok(None) => {}
                    Err(e) => debug!(key = %key, error = %e, "Prefetch failed"),
                }
            }
        });
    }

    fn remove_entry(&self, key: &CacheKey) {
        if let Some((_, entry)) = self.entries.remove(key) {
            self.raw_bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
        }
        self.warm.remove(key);
    }

    /// Index usage before compression, without walking the index.
    fn raw_usage(&self) -> CacheUsage {
        CacheUsage {
            bytes: self.raw_bytes.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    fn maybe_auto_optimize(&self) {
        let config = self.config.read().clone();
        // Raw usage bounds compressed usage from above
        if self.raw_usage().utilization(&config) < config.high_water_mark {
            return;
        }
        if self.usage(config.compression).utilization(&config) < config.high_water_mark {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if self.auto_optimize_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = self.self_ref.clone();
        handle.spawn(async move {
            let Some(engine) = weak.upgrade() else {
                return;
            };
            if let Ok(_guard) = engine.optimize_lock.try_lock() {
                debug!("High-water mark crossed, optimizing");
                engine.run_optimization(false).await;
            }
            engine.auto_optimize_pending.store(false, Ordering::Release);
        });
    }

    fn update_gauges(&self) {
        let usage = self.raw_usage();
        crate::metrics::set_cache_entries(usage.entries);
        crate::metrics::set_cache_bytes(usage.bytes);
    }
}

impl StoreObserver for CacheEngine {
    fn on_upsert(&self, record: &DomainRecord) {
        let key = CacheKey::of(record);
        let compression = self.config.read().compression;
        let now = now_millis();
        {
            let mut entry = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry {
                    size_bytes: 0,
                    ..CacheEntry::from_record(record)
                });
            let e = entry.value_mut();
            let before = e.size_bytes;
            e.refresh_from(record);
            self.raw_bytes.fetch_add(e.size_bytes, Ordering::Relaxed);
            self.raw_bytes.fetch_sub(before, Ordering::Relaxed);
            if compression {
                let ratio = estimate_record_ratio(record);
                e.estimated_ratio = Some(ratio);
                e.compression_ratio = ratio;
            }
            self.policy.refresh(e, now);
        }
        if let Some(mut warm) = self.warm.get_mut(&key) {
            *warm = record.clone();
        }
        self.update_gauges();
        self.maybe_auto_optimize();
    }

    fn on_remove(&self, entity_type: EntityType, id: &str) {
        self.remove_entry(&CacheKey::new(entity_type, id));
        self.update_gauges();
    }

    fn on_clear(&self) {
        self.reset();
    }
}
