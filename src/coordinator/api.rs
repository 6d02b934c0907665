//! Data-facing API: reads, cached writes, queued mutations, connectivity.

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, OptimizationReport};
use crate::error::OfflineError;
use crate::record::{DomainRecord, EntityPayload, EntityType, SyncOperation, SyncStatus};
use crate::storage::persistent::{CachedImage, StorageStats};
use crate::sync::events::{Subscription, SyncEvent, SyncEventKind};
use crate::sync::network::NetworkCondition;
use crate::sync::queue_item::{QueueItemDraft, SyncQueueItem};
use crate::sync::{ConflictAction, SyncRun, SyncStats};

use super::{ConnectivityStatus, OfflineManager, SyncCounts};

impl OfflineManager {
    // ───────────────────────── cache fills ─────────────────────────

    /// Store data fetched from the remote. Marked `synced`.
    pub async fn cache_record(&self, payload: EntityPayload) -> Result<DomainRecord, OfflineError> {
        Ok(self.tracked.put_record(payload, SyncStatus::Synced).await?)
    }

    pub async fn cache_recipe(&self, data: Value) -> Result<DomainRecord, OfflineError> {
        self.cache_typed(EntityType::Recipe, data).await
    }

    pub async fn cache_ingredient(&self, data: Value) -> Result<DomainRecord, OfflineError> {
        self.cache_typed(EntityType::Ingredient, data).await
    }

    pub async fn cache_technique(&self, data: Value) -> Result<DomainRecord, OfflineError> {
        self.cache_typed(EntityType::Technique, data).await
    }

    pub async fn cache_menu(&self, data: Value) -> Result<DomainRecord, OfflineError> {
        self.cache_typed(EntityType::Menu, data).await
    }

    async fn cache_typed(&self, entity_type: EntityType, data: Value) -> Result<DomainRecord, OfflineError> {
        let payload = EntityPayload::from_json(entity_type, data)?;
        self.cache_record(payload).await
    }

    pub async fn cache_image(&self, url: &str, data: Vec<u8>, content_type: &str) -> Result<(), OfflineError> {
        Ok(self.store.cache_image(url, data, content_type).await?)
    }

    // ───────────────────────── reads ─────────────────────────

    pub async fn get_cached(&self, entity_type: EntityType) -> Result<Vec<DomainRecord>, OfflineError> {
        Ok(self.tracked.get_all(entity_type).await?)
    }

    pub async fn get_cached_recipes(&self) -> Result<Vec<DomainRecord>, OfflineError> {
        self.get_cached(EntityType::Recipe).await
    }

    pub async fn get_cached_ingredients(&self) -> Result<Vec<DomainRecord>, OfflineError> {
        self.get_cached(EntityType::Ingredient).await
    }

    pub async fn get_cached_techniques(&self) -> Result<Vec<DomainRecord>, OfflineError> {
        self.get_cached(EntityType::Technique).await
    }

    pub async fn get_cached_menus(&self) -> Result<Vec<DomainRecord>, OfflineError> {
        self.get_cached(EntityType::Menu).await
    }

    /// Point read, counted as an access by the cache engine.
    pub async fn get_record(&self, entity_type: EntityType, id: &str) -> Result<Option<DomainRecord>, OfflineError> {
        Ok(self.tracked.get_record(entity_type, id).await?)
    }

    pub async fn get_cached_image(&self, url: &str) -> Result<Option<CachedImage>, OfflineError> {
        Ok(self.store.get_cached_image(url).await?)
    }

    // ───────────────────────── mutations ─────────────────────────

    /// Record a local mutation and queue it for the remote.
    ///
    /// Creates and updates are written locally as `pending`; a delete marks
    /// the cached copy `pending` and removes it once the remote applies it.
    /// When online the queue is drained before returning; drain failures
    /// are reported through events only. An invalid draft fails before the
    /// cached copy is touched.
    #[tracing::instrument(skip(self, draft), fields(entity_type = %draft.payload.entity_type(), id = %draft.payload.id(), operation = %draft.operation))]
    pub async fn queue_sync(&self, draft: QueueItemDraft) -> Result<SyncQueueItem, OfflineError> {
        // Nothing is written for a draft the queue would refuse
        draft.validate()?;
        match draft.operation {
            SyncOperation::Create | SyncOperation::Update => {
                self.store.cache_pending(draft.payload.clone(), draft.operation).await?;
            }
            SyncOperation::Delete => {
                let entity_type = draft.payload.entity_type();
                self.store
                    .update_sync_status(entity_type, draft.payload.id(), SyncStatus::Pending)
                    .await?;
            }
        }

        let item = self.sync.add_to_queue(draft).await?;
        self.drain_in_background_context().await;
        Ok(item)
    }

    /// Drain the queue now. Explicit calls bypass a pause.
    pub async fn process_sync_queue(&self) -> Result<SyncRun, OfflineError> {
        Ok(self.sync.force_sync().await?)
    }

    /// Automatic drain: skipped when offline, paused or not yet initialized.
    async fn drain_in_background_context(&self) {
        if !self.is_initialized() || !self.sync.is_online() || self.sync.is_paused() {
            return;
        }
        if let Err(e) = self.sync.force_sync().await {
            warn!(error = %e, "Queue drain failed");
        }
    }

    pub async fn resolve_conflict(&self, item_id: &str, action: ConflictAction) -> Result<bool, OfflineError> {
        Ok(self.sync.resolve_conflict(item_id, action).await?)
    }

    pub fn pause_sync(&self) {
        self.sync.pause_sync();
    }

    pub fn resume_sync(&self) {
        self.sync.resume_sync();
    }

    // ───────────────────────── connectivity ─────────────────────────

    /// Forward a platform connectivity report (`effective_type` as in
    /// `"4g"`, `"3g"`, `"2g"`, `"slow-2g"`).
    pub async fn report_connectivity(&self, online: bool, effective_type: Option<&str>) -> ConnectivityStatus {
        let condition = self.connectivity.condition_for(online, effective_type);
        self.report_network_condition(condition).await
    }

    /// Forward a full network condition, including cost and connection type.
    pub async fn report_network_condition(&self, condition: NetworkCondition) -> ConnectivityStatus {
        let transition = self.connectivity.update(condition);
        self.sync.set_network_condition(condition);

        let Some(transition) = transition else {
            return self.connectivity.status();
        };

        crate::metrics::set_connectivity(transition.current.level());
        info!(from = %transition.previous, to = %transition.current, "Connectivity changed");
        self.sync.event_bus().emit(SyncEvent::new(SyncEventKind::ConnectivityChanged).with_data(json!({
            "status": transition.current,
            "previous": transition.previous,
        })));

        if transition.came_online() {
            debug!("Back online, draining queue");
            self.drain_in_background_context().await;
        }
        transition.current
    }

    #[must_use]
    pub fn connectivity_status(&self) -> ConnectivityStatus {
        self.connectivity.status()
    }

    // ───────────────────────── stats & maintenance ─────────────────────────

    pub async fn get_storage_stats(&self) -> Result<StorageStats, OfflineError> {
        Ok(self.store.get_storage_stats().await?)
    }

    pub async fn get_cache_stats(&self) -> Result<CacheStats, OfflineError> {
        Ok(self.cache.get_cache_stats().await?)
    }

    pub async fn get_sync_stats(&self) -> Result<SyncStats, OfflineError> {
        Ok(self.sync.get_sync_stats().await?)
    }

    pub async fn sync_counts(&self) -> Result<SyncCounts, OfflineError> {
        let stats = self.store.get_storage_stats().await?;
        let pending = stats.pending();
        let conflicted = stats.conflicted();
        Ok(SyncCounts {
            pending,
            synced: stats.record_count().saturating_sub(pending + conflicted),
            conflicted,
            queued: stats.queue_len,
        })
    }

    /// Wipe every collection and the cache index.
    pub async fn clear_cache(&self) -> Result<(), OfflineError> {
        self.cache.clear_cache().await?;
        self.sync.clear_all().await?;
        Ok(())
    }

    pub async fn optimize_storage(&self) -> OptimizationReport {
        self.cache.optimize_cache().await
    }

    // ───────────────────────── events ─────────────────────────

    /// Register a lifecycle callback. Call `unsubscribe` on the handle to stop.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.sync.subscribe(callback)
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.sync.events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::config::{OfflineConfig, SyncConfig};
    use crate::coordinator::ManagerState;
    use crate::sync::queue_item::{SyncPriority, SyncStrategy};
    use crate::sync::remote::{RemoteApplier, RemoteFn, RemoteRequest, SyncError};

    fn config() -> OfflineConfig {
        OfflineConfig {
            sync: SyncConfig {
                retry_delay_ms: 0,
                enable_background_sync: false,
                ..SyncConfig::default()
            },
            ..OfflineConfig::default()
        }
    }

    fn counting_remote() -> (Arc<dyn RemoteApplier>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let remote = RemoteFn(move |req: RemoteRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok::<Value, SyncError>(req.payload))
        });
        (Arc::new(remote), calls)
    }

    async fn manager() -> (OfflineManager, Arc<AtomicUsize>) {
        let (remote, calls) = counting_remote();
        let manager = OfflineManager::new(config(), remote).unwrap();
        manager.initialize().await.unwrap();
        (manager, calls)
    }

    fn recipe(id: &str) -> EntityPayload {
        EntityPayload::from_json(EntityType::Recipe, json!({"id": id, "name": "Daiquiri"})).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (manager, _) = manager().await;
        assert_eq!(manager.state(), ManagerState::Running);
        manager.initialize().await.unwrap();
        assert!(manager.is_initialized());

        manager.shutdown().await;
        assert_eq!(manager.state(), ManagerState::Stopped);
    }

    #[tokio::test]
    async fn test_cache_fill_is_synced() {
        let (manager, _) = manager().await;
        let record = manager.cache_recipe(json!({"id": "r1"})).await.unwrap();
        assert_eq!(record.sync_status, SyncStatus::Synced);
        assert!(record.last_synced_at.is_some());
        assert_eq!(manager.get_cached_recipes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_payload_rejected() {
        let (manager, _) = manager().await;
        let result = manager.cache_menu(json!({"name": "no id"})).await;
        assert!(matches!(result, Err(OfflineError::Payload(_))));
    }

    #[tokio::test]
    async fn test_queue_sync_online_drains() {
        let (manager, calls) = manager().await;
        manager
            .queue_sync(QueueItemDraft::new(SyncOperation::Create, recipe("r1")))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let record = manager.get_record(EntityType::Recipe, "r1").await.unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Synced);
        assert!(manager.sync_counts().await.unwrap().is_settled());
    }

    #[tokio::test]
    async fn test_rejected_draft_writes_nothing() {
        let (manager, calls) = manager().await;
        manager.cache_recipe(json!({"id": "r1", "name": "Daiquiri"})).await.unwrap();

        let edited = EntityPayload::from_json(EntityType::Recipe, json!({"id": "r1", "name": "Hemingway"})).unwrap();
        let result = manager
            .queue_sync(QueueItemDraft::new(SyncOperation::Update, edited).max_retries(0))
            .await;
        assert!(matches!(result, Err(OfflineError::Sync(SyncError::Validation(_)))));

        let result = manager
            .queue_sync(QueueItemDraft::new(SyncOperation::Delete, recipe("r1")).backoff_multiplier(0.0))
            .await;
        assert!(matches!(result, Err(OfflineError::Sync(SyncError::Validation(_)))));

        let record = manager.get_record(EntityType::Recipe, "r1").await.unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Synced);
        assert_eq!(record.payload.data()["name"], "Daiquiri");
        assert_eq!(manager.sync_counts().await.unwrap(), SyncCounts { pending: 0, synced: 1, conflicted: 0, queued: 0 });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_fill_keeps_offline_edit() {
        let (manager, _) = manager().await;
        manager.report_connectivity(false, None).await;
        let edited = EntityPayload::from_json(EntityType::Recipe, json!({"id": "r1", "name": "Hemingway"})).unwrap();
        manager
            .queue_sync(QueueItemDraft::new(SyncOperation::Update, edited))
            .await
            .unwrap();

        let record = manager.cache_recipe(json!({"id": "r1", "name": "Daiquiri"})).await.unwrap();
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.payload.data()["name"], "Hemingway");
        assert_eq!(manager.sync_counts().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_queue_sync_offline_holds_then_drains_on_reconnect() {
        let (manager, calls) = manager().await;
        assert_eq!(manager.report_connectivity(false, None).await, ConnectivityStatus::Offline);

        manager
            .queue_sync(QueueItemDraft::new(SyncOperation::Update, recipe("r1")))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let counts = manager.sync_counts().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.queued, 1);

        assert_eq!(manager.report_connectivity(true, Some("4g")).await, ConnectivityStatus::Online);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let counts = manager.sync_counts().await.unwrap();
        assert_eq!(counts, SyncCounts { pending: 0, synced: 1, conflicted: 0, queued: 0 });
    }

    #[tokio::test]
    async fn test_slow_connection_still_drains() {
        let (manager, calls) = manager().await;
        assert_eq!(manager.report_connectivity(true, Some("slow-2g")).await, ConnectivityStatus::Slow);
        manager
            .queue_sync(QueueItemDraft::new(SyncOperation::Create, recipe("r1")))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connectivity_events() {
        let (manager, _) = manager().await;
        let changes = Arc::new(AtomicUsize::new(0));
        let seen = changes.clone();
        let sub = manager.subscribe(move |event| {
            if event.kind == SyncEventKind::ConnectivityChanged {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        manager.report_connectivity(false, None).await;
        manager.report_connectivity(false, None).await;
        manager.report_connectivity(true, None).await;
        assert_eq!(changes.load(Ordering::SeqCst), 2);

        sub.unsubscribe();
        manager.report_connectivity(false, None).await;
        assert_eq!(changes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_paused_manager_does_not_auto_drain() {
        let (manager, calls) = manager().await;
        manager.pause_sync();
        manager
            .queue_sync(
                QueueItemDraft::new(SyncOperation::Update, recipe("r1"))
                    .priority(SyncPriority::Critical)
                    .strategy(SyncStrategy::Immediate),
            )
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let run = manager.process_sync_queue().await.unwrap();
        assert_eq!(run.totals.succeeded, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_after_sync() {
        let (manager, _) = manager().await;
        manager.cache_recipe(json!({"id": "r1"})).await.unwrap();
        manager.report_connectivity(false, None).await;

        manager
            .queue_sync(QueueItemDraft::new(SyncOperation::Delete, recipe("r1")))
            .await
            .unwrap();
        let record = manager.get_record(EntityType::Recipe, "r1").await.unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Pending);

        manager.report_connectivity(true, None).await;
        assert!(manager.get_record(EntityType::Recipe, "r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_cache_wipes_everything() {
        let (manager, _) = manager().await;
        manager.cache_recipe(json!({"id": "r1"})).await.unwrap();
        manager.cache_image("https://img/r1.png", vec![1, 2, 3], "image/png").await.unwrap();
        manager.get_record(EntityType::Recipe, "r1").await.unwrap();

        manager.clear_cache().await.unwrap();
        let stats = manager.get_storage_stats().await.unwrap();
        assert_eq!(stats.record_count(), 0);
        assert_eq!(stats.images.count, 0);
        assert!(manager.cache().get_cache_entries().is_empty());
        assert!(manager.cache().get_access_history().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let (remote, _) = counting_remote();
        let mut bad = config();
        bad.cache.max_entries = 0;
        assert!(OfflineManager::new(bad, remote).is_err());
    }
}
