// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The sync engine: drains the persisted mutation queue into the remote.
//!
//! # Item lifecycle
//!
//! ```text
//! queued ──► batched ──► in-flight ──┬──► synced (removed)
//!   ▲                                ├──► retry-scheduled ──► (due again) ──► queued
//!   │                                ├──► conflict (retained, surfaced)
//!   └──── resolve_conflict ◄─────────┘──► dropped (removed)
//! ```
//!
//! Only one drain runs at a time. Timer ticks that find a drain in progress
//! return at once; explicit calls ([`SyncEngine::force_sync`], immediate
//! items) wait their turn.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::batch::{self, SyncBatch};
use super::events::{EventBus, Subscription, SyncEvent, SyncEventKind};
use super::network::NetworkCondition;
use super::queue_item::{ConflictResolution, QueueItemDraft, QueueItemState, SyncPriority, SyncQueueItem};
use super::remote::{RemoteApplier, RemoteRequest, SyncError};
use super::scheduler::ScheduledTask;
use crate::config::SyncConfig;
use crate::record::{now_millis, SyncOperation, SyncStatus};
use crate::resilience::retry::backoff_delay;
use crate::storage::traits::StorageError;
use crate::storage::PersistentStore;

/// How one queue item settled after an apply attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Applied remotely and removed from the queue
    Synced,
    /// Failed; will be retried after backoff
    RetryScheduled,
    /// Retained in conflict state until resolved
    Conflict,
    /// Retries exhausted on a non-conflict error; removed
    Dropped,
    /// Left the queue while in flight (cleared or resolved); nothing persisted
    Superseded,
}

/// Tally for one batch (or one whole drain).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub conflicts: usize,
    pub dropped: usize,
    #[serde(skip)]
    pub duration: Duration,
}

impl BatchResult {
    fn record(&mut self, outcome: ItemOutcome) {
        self.processed += 1;
        match outcome {
            ItemOutcome::Synced => self.succeeded += 1,
            ItemOutcome::RetryScheduled => self.failed += 1,
            ItemOutcome::Conflict => self.conflicts += 1,
            ItemOutcome::Dropped => {
                self.failed += 1;
                self.dropped += 1;
            }
            ItemOutcome::Superseded => {}
        }
    }

    fn absorb(&mut self, other: &BatchResult) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.conflicts += other.conflicts;
        self.dropped += other.dropped;
        self.duration += other.duration;
    }
}

/// Summary of one drain of the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncRun {
    /// Batches dispatched
    pub batches: usize,
    /// Batches held back by admission control or a lost connection
    pub deferred: usize,
    pub totals: BatchResult,
}

/// Application decision for an item retained in conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    /// Re-send the local copy, asking the remote to overwrite
    KeepLocal,
    /// Drop the mutation and the local copy; the next fetch repopulates it
    DiscardLocal,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub queued: usize,
    /// Eligible for the next batch
    pub due: usize,
    /// Waiting out a backoff delay
    pub retry_scheduled: usize,
    /// Retained in conflict state
    pub in_conflict: usize,
    pub by_priority: BTreeMap<SyncPriority, usize>,
    pub synced_total: u64,
    pub failed_total: u64,
    pub dropped_total: u64,
    pub conflicts_total: u64,
    pub last_sync_at: Option<i64>,
    pub is_online: bool,
    pub is_paused: bool,
    pub is_syncing: bool,
    pub network: NetworkCondition,
}

#[derive(Default)]
struct Counters {
    synced: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    conflicts: AtomicU64,
    /// Epoch millis of the last finished drain, 0 if none
    last_sync_at: AtomicI64,
}

impl Counters {
    fn reset(&self) {
        self.synced.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.conflicts.store(0, Ordering::Relaxed);
        self.last_sync_at.store(0, Ordering::Relaxed);
    }
}

/// Reconciles the persisted mutation queue with the remote.
pub struct SyncEngine {
    store: Arc<PersistentStore>,
    remote: Arc<dyn RemoteApplier>,
    config: RwLock<SyncConfig>,
    network: RwLock<NetworkCondition>,
    paused: AtomicBool,
    /// Single-flight guard for queue drains
    drain_lock: tokio::sync::Mutex<()>,
    scheduler: Mutex<Option<ScheduledTask>>,
    events: EventBus,
    counters: Counters,
    self_ref: Weak<SyncEngine>,
}

impl SyncEngine {
    pub fn new(store: Arc<PersistentStore>, remote: Arc<dyn RemoteApplier>, config: SyncConfig) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            store,
            remote,
            config: RwLock::new(config),
            network: RwLock::new(NetworkCondition::default()),
            paused: AtomicBool::new(false),
            drain_lock: tokio::sync::Mutex::new(()),
            scheduler: Mutex::new(None),
            events: EventBus::new(),
            counters: Counters::default(),
            self_ref: self_ref.clone(),
        })
    }

    #[must_use]
    pub fn config(&self) -> SyncConfig {
        self.config.read().clone()
    }

    #[must_use]
    pub fn network_condition(&self) -> NetworkCondition {
        *self.network.read()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.network.read().online
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// A drain is in progress.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.drain_lock.try_lock().is_err()
    }

    /// Timer is armed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.scheduler.lock().as_ref().is_some_and(ScheduledTask::is_running)
    }

    // ───────────────────────── lifecycle ─────────────────────────

    /// Arm the background timer. No-op when background sync is disabled,
    /// the engine is paused, the timer is already running, or there is no
    /// runtime to spawn on.
    pub fn start(&self) {
        if !self.config.read().enable_background_sync {
            debug!("Background sync disabled");
            return;
        }
        if self.is_paused() {
            debug!("Sync paused, timer not started");
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("No tokio runtime; background sync not started");
            return;
        }

        let period = self.tick_period();
        let mut slot = self.scheduler.lock();
        if slot.as_ref().is_some_and(ScheduledTask::is_running) {
            return;
        }

        let weak = self.self_ref.clone();
        *slot = Some(ScheduledTask::spawn("background_sync", period, move || {
            let weak = weak.clone();
            async move {
                if let Some(engine) = weak.upgrade() {
                    engine.tick().await;
                }
            }
        }));
        info!(period_ms = period.as_millis() as u64, "Background sync started");
    }

    /// Stop the timer and wait for any drain in progress to settle.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.stop_timer();
        let _guard = self.drain_lock.lock().await;
        info!("Sync engine stopped");
    }

    fn stop_timer(&self) {
        if let Some(task) = self.scheduler.lock().take() {
            task.cancel();
        }
    }

    /// Period from the network tier, or the configured interval when the
    /// network gives no hint.
    fn tick_period(&self) -> Duration {
        let configured = Duration::from_millis(self.config.read().sync_interval_ms);
        self.network.read().sync_interval().unwrap_or(configured)
    }

    async fn tick(&self) {
        if self.is_paused() || !self.is_online() {
            return;
        }
        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!("Drain already in progress, skipping tick");
            return;
        };
        if let Err(e) = self.drain(true).await {
            warn!(error = %e, "Background sync failed");
        }
    }

    // ───────────────────────── network ─────────────────────────

    /// Replace the network condition and re-period the timer to match.
    pub fn set_network_condition(&self, condition: NetworkCondition) {
        let previous = std::mem::replace(&mut *self.network.write(), condition);
        if previous == condition {
            return;
        }
        debug!(
            online = condition.online,
            speed = ?condition.speed,
            cost = ?condition.cost,
            "Network condition changed"
        );

        let period = self.tick_period();
        if let Some(task) = self.scheduler.lock().as_ref() {
            task.set_period(period);
        }
    }

    pub fn set_online(&self, online: bool) {
        let mut condition = self.network_condition();
        condition.online = online;
        self.set_network_condition(condition);
    }

    // ───────────────────────── queue ─────────────────────────

    /// Persist a new mutation. Critical items with the immediate strategy
    /// are applied before this returns when online and not paused.
    #[tracing::instrument(skip(self, draft), fields(entity_type = %draft.payload.entity_type(), id = %draft.payload.id()))]
    pub async fn add_to_queue(&self, draft: QueueItemDraft) -> Result<SyncQueueItem, SyncError> {
        draft.validate()?;

        let item = draft.build(&self.config.read());
        self.store.add_to_sync_queue(&item).await?;
        crate::metrics::record_item_queued(&item.priority.to_string());
        debug!(item_id = %item.id, priority = %item.priority, operation = %item.operation, "Item queued");

        self.events.emit(SyncEvent::new(SyncEventKind::ItemQueued).with_data(json!({
            "itemId": item.id,
            "entityType": item.entity_type(),
            "entityId": item.entity_id(),
            "operation": item.operation,
            "priority": item.priority,
        })));

        if item.is_immediate() {
            if self.is_online() && !self.is_paused() {
                let _guard = self.drain_lock.lock().await;
                // A drain that held the lock may already have settled it
                if let Some(current) = self.store.get_sync_queue_item(&item.id).await? {
                    if current.is_due(now_millis()) {
                        self.process_single_item(current).await?;
                    }
                }
            } else {
                debug!(item_id = %item.id, "Immediate item deferred until online");
            }
        }

        self.refresh_queue_depth().await;
        Ok(item)
    }

    /// Due items packed into ordered batches for the current network.
    pub async fn create_optimized_batches(&self) -> Result<Vec<SyncBatch>, StorageError> {
        let now = now_millis();
        let due: Vec<SyncQueueItem> = self
            .store
            .get_sync_queue()
            .await?
            .into_iter()
            .filter(|item| item.is_due(now))
            .collect();
        Ok(batch::create_optimized_batches(due, &self.network_condition()))
    }

    #[must_use]
    pub fn should_process_batch(&self, batch: &SyncBatch) -> bool {
        batch::should_process_batch(batch, &self.network_condition())
    }

    // ───────────────────────── drain ─────────────────────────

    /// Drain now, waiting for any drain in progress. Bypasses pause but
    /// still honours backoff schedules and batch admission.
    #[tracing::instrument(skip(self))]
    pub async fn force_sync(&self) -> Result<SyncRun, SyncError> {
        let _guard = self.drain_lock.lock().await;
        Ok(self.drain(false).await?)
    }

    /// Caller holds `drain_lock`.
    async fn drain(&self, respect_pause: bool) -> Result<SyncRun, StorageError> {
        let mut run = SyncRun::default();
        if !self.is_online() {
            debug!("Offline, nothing sent");
            return Ok(run);
        }

        let batches = self.create_optimized_batches().await?;
        if batches.is_empty() {
            return Ok(run);
        }

        let items: usize = batches.iter().map(SyncBatch::len).sum();
        info!(batches = batches.len(), items, "Sync started");
        self.events.emit(SyncEvent::new(SyncEventKind::SyncStart).with_data(json!({
            "batches": batches.len(),
            "items": items,
        })));

        let total_batches = batches.len();
        for (index, batch) in batches.into_iter().enumerate() {
            if respect_pause && self.is_paused() {
                debug!("Sync paused mid-drain");
                run.deferred += total_batches - index;
                break;
            }

            let network = self.network_condition();
            if !network.online {
                debug!("Connection lost mid-drain");
                run.deferred += total_batches - index;
                break;
            }

            if let Err(reason) = batch::check_batch(&batch, &network) {
                debug!(
                    items = batch.len(),
                    bytes = batch.total_size,
                    reason = %reason,
                    "Batch deferred"
                );
                crate::metrics::record_batch_rejected(reason.label());
                run.deferred += 1;
                continue;
            }

            let result = self.process_batch(batch).await;
            run.batches += 1;
            run.totals.absorb(&result);
        }

        self.counters.last_sync_at.store(now_millis(), Ordering::Relaxed);
        info!(
            sent = run.batches,
            deferred = run.deferred,
            succeeded = run.totals.succeeded,
            failed = run.totals.failed,
            conflicts = run.totals.conflicts,
            "Sync complete"
        );
        self.events.emit(SyncEvent::new(SyncEventKind::SyncComplete).with_data(json!(run)));
        self.refresh_queue_depth().await;
        Ok(run)
    }

    /// Apply every item in order. Per-item storage failures are logged and
    /// counted; they never abort the batch.
    #[tracing::instrument(skip(self, batch), fields(items = batch.len(), bytes = batch.total_size))]
    pub async fn process_batch(&self, batch: SyncBatch) -> BatchResult {
        let start = Instant::now();
        crate::metrics::record_batch(batch.len(), batch.total_size);

        let total = batch.len();
        let mut result = BatchResult::default();
        for (index, mut item) in batch.items.into_iter().enumerate() {
            item.state = QueueItemState::Batched;
            let item_id = item.id.clone();
            match self.process_single_item(item).await {
                Ok(outcome) => result.record(outcome),
                Err(e) => {
                    error!(item_id = %item_id, error = %e, "Queue item could not be settled");
                    result.processed += 1;
                    result.failed += 1;
                }
            }

            let progress = (index + 1) as f64 / total as f64 * 100.0;
            self.events.emit(
                SyncEvent::new(SyncEventKind::SyncProgress)
                    .with_progress(progress)
                    .with_data(json!({ "itemId": item_id, "processed": index + 1, "total": total })),
            );
        }

        result.duration = start.elapsed();
        result
    }

    /// One remote apply and its bookkeeping.
    pub async fn process_single_item(&self, mut item: SyncQueueItem) -> Result<ItemOutcome, StorageError> {
        item.state = QueueItemState::InFlight;
        let request = RemoteRequest::from(&item);

        let start = Instant::now();
        let applied = self.remote.apply(request).await;
        crate::metrics::record_sync_latency(start.elapsed());

        match applied {
            Ok(_) => {
                self.settle_applied(&item).await?;
                self.counters.synced.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_sync_outcome("synced");
                debug!(item_id = %item.id, entity_id = %item.entity_id(), "Item synced");
                Ok(ItemOutcome::Synced)
            }
            Err(error) => self.handle_sync_error(item, error).await,
        }
    }

    async fn settle_applied(&self, item: &SyncQueueItem) -> Result<(), StorageError> {
        self.store.remove_from_sync_queue(&item.id).await?;

        let entity_type = item.entity_type();
        let entity_id = item.entity_id();
        match item.operation {
            SyncOperation::Delete => self.store.delete_record(entity_type, entity_id).await?,
            SyncOperation::Create | SyncOperation::Update => {
                // A later edit to the same entity keeps it pending
                let still_queued = self
                    .store
                    .get_sync_queue()
                    .await?
                    .iter()
                    .any(|other| other.entity_type() == entity_type && other.entity_id() == entity_id);
                if !still_queued {
                    self.store.update_sync_status(entity_type, entity_id, SyncStatus::Synced).await?;
                }
            }
        }
        Ok(())
    }

    /// Route a failed apply: back off, surface a conflict, or drop.
    ///
    /// Under the manual policy a conflict-classified error stops retries at
    /// once. Otherwise conflicts retry like any error, and are surfaced
    /// (never dropped) once retries run out.
    pub async fn handle_sync_error(&self, mut item: SyncQueueItem, error: SyncError) -> Result<ItemOutcome, StorageError> {
        item.retry_count += 1;
        item.last_error = Some(error.to_string());
        self.counters.failed.fetch_add(1, Ordering::Relaxed);

        if self.store.get_sync_queue_item(&item.id).await?.is_none() {
            debug!(item_id = %item.id, "Item left the queue while in flight");
            return Ok(ItemOutcome::Superseded);
        }

        let conflict = error.is_conflict();
        let exhausted = item.retry_count >= item.max_retries;

        if conflict && (item.conflict_resolution == ConflictResolution::Manual || exhausted) {
            return self.surface_conflict(item).await;
        }

        if exhausted {
            self.store.remove_from_sync_queue(&item.id).await?;
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_sync_outcome("dropped");
            warn!(
                item_id = %item.id,
                entity_id = %item.entity_id(),
                retries = item.retry_count,
                error = %error,
                "Retries exhausted, item dropped"
            );
            self.events.emit(
                SyncEvent::new(SyncEventKind::SyncError)
                    .with_error(&error)
                    .with_data(json!({
                        "itemId": item.id,
                        "retryCount": item.retry_count,
                        "willRetry": false,
                    })),
            );
            return Ok(ItemOutcome::Dropped);
        }

        let base = Duration::from_millis(self.config.read().retry_delay_ms);
        let delay = backoff_delay(base, item.backoff_multiplier, item.retry_count);
        let retry_at = now_millis() + delay.as_millis() as i64;
        item.scheduled_for = Some(retry_at);
        item.state = QueueItemState::RetryScheduled;
        self.store.update_sync_queue_item(&item).await?;

        crate::metrics::record_sync_outcome("retry");
        debug!(
            item_id = %item.id,
            retry = item.retry_count,
            max = item.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retry scheduled"
        );
        self.events.emit(
            SyncEvent::new(SyncEventKind::SyncError)
                .with_error(&error)
                .with_data(json!({
                    "itemId": item.id,
                    "retryCount": item.retry_count,
                    "willRetry": true,
                    "retryAt": retry_at,
                })),
        );
        Ok(ItemOutcome::RetryScheduled)
    }

    async fn surface_conflict(&self, mut item: SyncQueueItem) -> Result<ItemOutcome, StorageError> {
        item.state = QueueItemState::Conflict;
        item.scheduled_for = None;
        self.store.update_sync_queue_item(&item).await?;
        self.store
            .update_sync_status(item.entity_type(), item.entity_id(), SyncStatus::Conflict)
            .await?;

        self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_sync_outcome("conflict");
        warn!(
            item_id = %item.id,
            entity_type = %item.entity_type(),
            entity_id = %item.entity_id(),
            retries = item.retry_count,
            "Conflict detected"
        );

        let mut event = SyncEvent::new(SyncEventKind::ConflictDetected).with_data(item.conflict_context());
        if let Some(message) = &item.last_error {
            event = event.with_error(message);
        }
        self.events.emit(event);
        Ok(ItemOutcome::Conflict)
    }

    /// Settle an item held in conflict. Returns `false` if no such item is queued.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_conflict(&self, item_id: &str, action: ConflictAction) -> Result<bool, SyncError> {
        let Some(mut item) = self.store.get_sync_queue_item(item_id).await? else {
            return Ok(false);
        };
        if item.state != QueueItemState::Conflict {
            return Err(SyncError::Validation(format!("item {item_id} is not in conflict")));
        }

        match action {
            ConflictAction::KeepLocal => {
                item.state = QueueItemState::Queued;
                item.retry_count = 0;
                item.scheduled_for = None;
                item.last_error = None;
                item.conflict_resolution = ConflictResolution::LastWriteWins;
                self.store.update_sync_queue_item(&item).await?;
                self.store
                    .update_sync_status(item.entity_type(), item.entity_id(), SyncStatus::Pending)
                    .await?;
            }
            ConflictAction::DiscardLocal => {
                self.store.remove_from_sync_queue(&item.id).await?;
                self.store.delete_record(item.entity_type(), item.entity_id()).await?;
            }
        }

        info!(item_id = %item_id, action = ?action, "Conflict resolved");
        self.refresh_queue_depth().await;
        Ok(true)
    }

    // ───────────────────────── controls ─────────────────────────

    pub async fn get_sync_stats(&self) -> Result<SyncStats, StorageError> {
        let queue = self.store.get_sync_queue().await?;
        let now = now_millis();

        let mut by_priority = BTreeMap::new();
        let (mut due, mut retry_scheduled, mut in_conflict) = (0, 0, 0);
        for item in &queue {
            *by_priority.entry(item.priority).or_insert(0) += 1;
            if item.state == QueueItemState::Conflict {
                in_conflict += 1;
            } else if item.is_due(now) {
                due += 1;
            } else {
                retry_scheduled += 1;
            }
        }

        let last_sync_at = match self.counters.last_sync_at.load(Ordering::Relaxed) {
            0 => None,
            at => Some(at),
        };

        Ok(SyncStats {
            queued: queue.len(),
            due,
            retry_scheduled,
            in_conflict,
            by_priority,
            synced_total: self.counters.synced.load(Ordering::Relaxed),
            failed_total: self.counters.failed.load(Ordering::Relaxed),
            dropped_total: self.counters.dropped.load(Ordering::Relaxed),
            conflicts_total: self.counters.conflicts.load(Ordering::Relaxed),
            last_sync_at,
            is_online: self.is_online(),
            is_paused: self.is_paused(),
            is_syncing: self.is_syncing(),
            network: self.network_condition(),
        })
    }

    /// Cancel the timer. The queue is untouched and a drain in progress
    /// finishes its current batch.
    pub fn pause_sync(&self) {
        self.paused.store(true, Ordering::Release);
        self.stop_timer();
        info!("Sync paused");
    }

    pub fn resume_sync(&self) {
        self.paused.store(false, Ordering::Release);
        info!("Sync resumed");
        self.start();
    }

    /// Empty the queue and reset counters.
    pub async fn clear_all(&self) -> Result<(), SyncError> {
        self.store.clear_sync_queue().await?;
        self.counters.reset();
        crate::metrics::set_queue_depth(0);
        info!("Sync state cleared");
        Ok(())
    }

    // ───────────────────────── events ─────────────────────────

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.receiver()
    }

    /// Shared with the coordinator so it can publish on the same stream.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    async fn refresh_queue_depth(&self) {
        match self.store.get_sync_queue().await {
            Ok(queue) => crate::metrics::set_queue_depth(queue.len()),
            Err(e) => debug!(error = %e, "Queue depth unavailable"),
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("network", &self.network_condition())
            .field("paused", &self.is_paused())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
