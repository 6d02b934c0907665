//! Read-through wrapper that reports accesses to the cache engine.

use std::sync::Arc;

use super::engine::CacheEngine;
use super::entry::CacheKey;
use crate::record::{DomainRecord, EntityPayload, EntityType, SyncStatus};
use crate::storage::traits::StorageError;
use crate::storage::PersistentStore;

/// Decorates [`PersistentStore`] reads with hit/miss and access tracking.
///
/// Point reads are served from the engine's warm set when possible and
/// warm it on a miss. Writes go straight to the store; the engine's index
/// follows through its store observer.
#[derive(Clone)]
pub struct TrackedStore {
    store: Arc<PersistentStore>,
    cache: Arc<CacheEngine>,
}

impl TrackedStore {
    pub fn new(store: Arc<PersistentStore>, cache: Arc<CacheEngine>) -> Self {
        Self { store, cache }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<PersistentStore> {
        &self.store
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheEngine> {
        &self.cache
    }

    pub async fn get_record(&self, entity_type: EntityType, id: &str) -> Result<Option<DomainRecord>, StorageError> {
        let key = CacheKey::new(entity_type, id);
        if let Some(record) = self.cache.warm_get(&key) {
            self.cache.record_hit();
            self.cache.record_access(entity_type, id);
            return Ok(Some(record));
        }

        self.cache.record_miss();
        let record = self.store.get_cached_record(entity_type, id).await?;
        if let Some(record) = &record {
            self.cache.warm_insert(record.clone());
            self.cache.record_access(entity_type, id);
        }
        Ok(record)
    }

    /// Full collection read. Not counted as per-record accesses.
    pub async fn get_all(&self, entity_type: EntityType) -> Result<Vec<DomainRecord>, StorageError> {
        self.store.get_cached(entity_type).await
    }

    pub async fn put_record(&self, payload: EntityPayload, status: SyncStatus) -> Result<DomainRecord, StorageError> {
        self.store.cache_record(payload, status).await
    }

    pub async fn delete_record(&self, entity_type: EntityType, id: &str) -> Result<(), StorageError> {
        self.store.delete_record(entity_type, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use serde_json::json;

    async fn tracked() -> TrackedStore {
        let store = Arc::new(PersistentStore::new(None));
        store.initialize().await.unwrap();
        let cache = CacheEngine::new(store.clone(), CacheConfig::default());
        TrackedStore::new(store, cache)
    }

    fn payload(id: &str) -> EntityPayload {
        EntityPayload::from_json(EntityType::Ingredient, json!({"id": id})).unwrap()
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let tracked = tracked().await;
        tracked.put_record(payload("mint"), SyncStatus::Synced).await.unwrap();

        assert!(tracked.get_record(EntityType::Ingredient, "mint").await.unwrap().is_some());
        assert!(tracked.get_record(EntityType::Ingredient, "mint").await.unwrap().is_some());

        let stats = tracked.cache().get_cache_stats().await.unwrap();
        assert!((stats.health.hit_rate - 0.5).abs() < 1e-9);
        assert_eq!(tracked.cache().get_access_history().len(), 2);

        let entry = tracked.cache().get_cache_entry(EntityType::Ingredient, "mint").unwrap();
        assert_eq!(entry.access_count, 2);
    }

    #[tokio::test]
    async fn test_absent_record_counts_miss_only() {
        let tracked = tracked().await;
        assert!(tracked.get_record(EntityType::Ingredient, "nope").await.unwrap().is_none());

        let stats = tracked.cache().get_cache_stats().await.unwrap();
        assert_eq!(stats.health.miss_rate, 1.0);
        assert!(tracked.cache().get_access_history().is_empty());
    }

    #[tokio::test]
    async fn test_warm_copy_follows_writes() {
        let tracked = tracked().await;
        tracked.put_record(payload("mint"), SyncStatus::Pending).await.unwrap();
        tracked.get_record(EntityType::Ingredient, "mint").await.unwrap();

        tracked.put_record(payload("mint"), SyncStatus::Synced).await.unwrap();
        let record = tracked.get_record(EntityType::Ingredient, "mint").await.unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Synced);

        tracked.delete_record(EntityType::Ingredient, "mint").await.unwrap();
        assert!(tracked.get_record(EntityType::Ingredient, "mint").await.unwrap().is_none());
    }
}
