// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The persistent store: typed, versioned storage over a [`KvBackend`].
//!
//! # Collections
//!
//! | Collection    | Key          | Value                        |
//! |---------------|--------------|------------------------------|
//! | `recipes`     | entity id    | JSON [`DomainRecord`]        |
//! | `ingredients` | entity id    | JSON [`DomainRecord`]        |
//! | `techniques`  | entity id    | JSON [`DomainRecord`]        |
//! | `menus`       | entity id    | JSON [`DomainRecord`]        |
//! | `syncQueue`   | item id      | JSON [`SyncQueueItem`]       |
//! | `images`      | url          | framed image bytes           |
//! | `metadata`    | name         | JSON value                   |
//!
//! # Backend selection
//!
//! [`PersistentStore::initialize`] opens SQLite at the configured path. If the
//! file cannot be opened, the store logs a warning and falls back to a
//! [`MemoryBackend`] snapshot at `{path}.kv.json`, which also survives a
//! restart. Only when that file is unusable too, or no path is configured at
//! all, does the store run in memory, and then nothing outlives the process:
//! queued changes included. [`PersistentStore::backend_kind`] and
//! [`StorageStats::durable`] tell callers which case they are in.
//!
//! The store never retries a failed operation. Retrying queue items is the
//! sync engine's job.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Instant;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::memory::MemoryBackend;
use super::sqlite::SqliteBackend;
use super::traits::{BackendKind, Collection, KvBackend, StorageError};
use crate::record::{now_millis, DomainRecord, EntityPayload, EntityType, SyncOperation, SyncStatus};
use crate::sync::queue_item::SyncQueueItem;

/// Version of the record layout written by this build.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Appended to the database path to name the fallback snapshot.
pub const FALLBACK_SUFFIX: &str = ".kv.json";

/// Notified after every successful record mutation.
///
/// The cache engine implements this to keep its index in step with the
/// store on existence.
pub trait StoreObserver: Send + Sync {
    fn on_upsert(&self, record: &DomainRecord);
    fn on_remove(&self, entity_type: EntityType, id: &str);
    fn on_clear(&self);
}

/// A cached image blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    pub url: String,
    pub content_type: String,
    pub cached_at: i64,
    pub data: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct ImageHeader {
    content_type: String,
    cached_at: i64,
}

impl CachedImage {
    /// `[u32 BE header length][JSON header][raw bytes]`
    fn encode(&self) -> Result<Vec<u8>, StorageError> {
        let header = serde_json::to_vec(&ImageHeader {
            content_type: self.content_type.clone(),
            cached_at: self.cached_at,
        })?;
        let mut out = Vec::with_capacity(4 + header.len() + self.data.len());
        out.extend_from_slice(&(header.len() as u32).to_be_bytes());
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    fn decode(url: &str, bytes: &[u8]) -> Result<Self, StorageError> {
        let corrupt = || StorageError::Backend(format!("Corrupt image frame for {}", url));
        let len_bytes: [u8; 4] = bytes.get(..4).and_then(|b| b.try_into().ok()).ok_or_else(corrupt)?;
        let header_len = u32::from_be_bytes(len_bytes) as usize;
        let header_end = 4usize.checked_add(header_len).ok_or_else(corrupt)?;
        let header_bytes = bytes.get(4..header_end).ok_or_else(corrupt)?;
        let header: ImageHeader = serde_json::from_slice(header_bytes)?;
        Ok(Self {
            url: url.to_string(),
            content_type: header.content_type,
            cached_at: header.cached_at,
            data: bytes[header_end..].to_vec(),
        })
    }
}

/// Count and size of one entity collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub count: usize,
    pub bytes: usize,
    pub pending: usize,
    pub conflicted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImageStats {
    pub count: usize,
    pub bytes: usize,
}

/// Snapshot of what the store holds, used for cache budget decisions.
#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub per_type: BTreeMap<EntityType, CollectionStats>,
    pub queue_len: usize,
    pub images: ImageStats,
    /// Record, queue and image bytes together
    pub total_bytes: usize,
    pub backend: BackendKind,
    /// False when running in memory only
    pub durable: bool,
}

impl StorageStats {
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.per_type.values().map(|s| s.count).sum()
    }

    #[must_use]
    pub fn record_bytes(&self) -> usize {
        self.per_type.values().map(|s| s.bytes).sum()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.per_type.values().map(|s| s.pending).sum()
    }

    #[must_use]
    pub fn conflicted(&self) -> usize {
        self.per_type.values().map(|s| s.conflicted).sum()
    }
}

/// Durable local storage for records, the sync queue, images and metadata.
pub struct PersistentStore {
    database_path: Option<String>,
    backend: OnceCell<Arc<dyn KvBackend>>,
    injected: Mutex<Option<Arc<dyn KvBackend>>>,
    observers: RwLock<Vec<Weak<dyn StoreObserver>>>,
}

impl PersistentStore {
    /// Store backed by SQLite at `database_path`, or memory only if `None`.
    pub fn new(database_path: Option<String>) -> Self {
        Self {
            database_path,
            backend: OnceCell::new(),
            injected: Mutex::new(None),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Store over a caller-supplied backend. Still needs [`Self::initialize`].
    pub fn with_backend(backend: Arc<dyn KvBackend>) -> Self {
        let store = Self::new(None);
        *store.injected.lock() = Some(backend);
        store
    }

    /// Acquire the backend and check the schema version. Idempotent.
    #[tracing::instrument(skip(self), fields(path = ?self.database_path))]
    pub async fn initialize(&self) -> Result<(), StorageError> {
        self.backend
            .get_or_try_init(|| async {
                let start = Instant::now();
                let backend = self.open_backend().await;
                ensure_schema(backend.as_ref()).await?;
                crate::metrics::record_startup_phase("store_open", start.elapsed());
                info!(backend = %backend.kind(), "Persistent store ready");
                Ok::<_, StorageError>(backend)
            })
            .await?;
        Ok(())
    }

    async fn open_backend(&self) -> Arc<dyn KvBackend> {
        let injected = self.injected.lock().take();
        if let Some(backend) = injected {
            return backend;
        }
        match &self.database_path {
            Some(path) => match SqliteBackend::open(path).await {
                Ok(sqlite) => Arc::new(sqlite),
                Err(e) => {
                    warn!(path = %path, error = %e, "SQLite unavailable, falling back to key-value file");
                    crate::metrics::record_store_fallback();
                    let fallback = format!("{path}{FALLBACK_SUFFIX}");
                    match MemoryBackend::open_file(&fallback).await {
                        Ok(file) => Arc::new(file),
                        Err(e) => {
                            warn!(
                                path = %fallback,
                                error = %e,
                                "Key-value file unavailable, running in memory; queued changes will not survive a restart"
                            );
                            Arc::new(MemoryBackend::new())
                        }
                    }
                }
            },
            None => {
                warn!("No database path configured, running in memory; nothing will survive a restart");
                Arc::new(MemoryBackend::new())
            }
        }
    }

    fn backend(&self) -> Result<&Arc<dyn KvBackend>, StorageError> {
        self.backend.get().ok_or(StorageError::NotInitialized)
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.backend.initialized()
    }

    /// Which engine is active, once initialized.
    #[must_use]
    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.get().map(|b| b.kind())
    }

    pub fn register_observer(&self, observer: Weak<dyn StoreObserver>) {
        let mut observers = self.observers.write();
        observers.retain(|o| o.strong_count() > 0);
        observers.push(observer);
    }

    fn notify(&self, f: impl Fn(&dyn StoreObserver)) {
        let observers: Vec<_> = self.observers.read().iter().filter_map(Weak::upgrade).collect();
        for observer in observers {
            f(observer.as_ref());
        }
    }

    // ───────────────────────── records ─────────────────────────

    /// Upsert one entity.
    ///
    /// `last_synced_at` never moves backwards: a synced write stamps
    /// `max(previous, now)`, any other status keeps the previous stamp.
    ///
    /// A synced write onto a pending or conflicted record is ignored and the
    /// stored record is returned unchanged. Only the sync engine settles a
    /// local edit, through [`PersistentStore::update_sync_status`].
    #[tracing::instrument(skip(self, payload), fields(entity_type = %payload.entity_type(), id = %payload.id()))]
    pub async fn cache_record(&self, payload: EntityPayload, status: SyncStatus) -> Result<DomainRecord, StorageError> {
        self.upsert(payload, status, None).await
    }

    /// Upsert a locally edited entity as pending with the mutation it awaits.
    pub async fn cache_pending(&self, payload: EntityPayload, operation: SyncOperation) -> Result<DomainRecord, StorageError> {
        self.upsert(payload, SyncStatus::Pending, Some(operation)).await
    }

    async fn upsert(
        &self,
        payload: EntityPayload,
        status: SyncStatus,
        pending_operation: Option<SyncOperation>,
    ) -> Result<DomainRecord, StorageError> {
        let backend = self.backend()?;
        let collection = payload.entity_type().collection();
        let previous: Option<DomainRecord> = read_json(backend.as_ref(), collection, payload.id()).await?;

        // A synced copy from the server never replaces an unsynced local edit
        if status == SyncStatus::Synced {
            if let Some(local) = previous.as_ref().filter(|p| p.sync_status != SyncStatus::Synced) {
                debug!(status = ?local.sync_status, "Keeping local edit over synced copy");
                crate::metrics::record_store_operation(collection.name(), "put", "skipped");
                return Ok(local.clone());
            }
        }

        let mut record = DomainRecord::new(payload, status);
        let now = record.local_modified_at;
        let previous_synced = previous.as_ref().and_then(|p| p.last_synced_at);
        record.last_synced_at = match status {
            SyncStatus::Synced => Some(previous_synced.map_or(now, |p| p.max(now))),
            _ => previous_synced,
        };
        record.pending_operation = match status {
            SyncStatus::Synced => None,
            _ => pending_operation.or_else(|| previous.and_then(|p| p.pending_operation)),
        };

        write_json(backend.as_ref(), collection, record.id(), &record).await?;
        crate::metrics::record_store_operation(collection.name(), "put", "success");
        self.notify(|o| o.on_upsert(&record));
        Ok(record)
    }

    pub async fn cache_recipe(&self, data: Value, status: SyncStatus) -> Result<DomainRecord, StorageError> {
        self.cache_typed(EntityType::Recipe, data, status).await
    }

    pub async fn cache_ingredient(&self, data: Value, status: SyncStatus) -> Result<DomainRecord, StorageError> {
        self.cache_typed(EntityType::Ingredient, data, status).await
    }

    pub async fn cache_technique(&self, data: Value, status: SyncStatus) -> Result<DomainRecord, StorageError> {
        self.cache_typed(EntityType::Technique, data, status).await
    }

    pub async fn cache_menu(&self, data: Value, status: SyncStatus) -> Result<DomainRecord, StorageError> {
        self.cache_typed(EntityType::Menu, data, status).await
    }

    async fn cache_typed(&self, entity_type: EntityType, data: Value, status: SyncStatus) -> Result<DomainRecord, StorageError> {
        let payload = EntityPayload::from_json(entity_type, data)?;
        self.cache_record(payload, status).await
    }

    /// Every cached record of one type, ordered by id.
    ///
    /// Undecodable rows are skipped with a warning rather than failing the read.
    pub async fn get_cached(&self, entity_type: EntityType) -> Result<Vec<DomainRecord>, StorageError> {
        let backend = self.backend()?;
        let collection = entity_type.collection();
        let _timer = crate::time_operation!(collection.name(), "scan");
        let mut records: Vec<DomainRecord> = scan_json(backend.as_ref(), collection).await?;
        records.sort_by(|a, b| a.id().cmp(b.id()));
        crate::metrics::record_store_operation(collection.name(), "scan", "success");
        Ok(records)
    }

    pub async fn get_cached_recipes(&self) -> Result<Vec<DomainRecord>, StorageError> {
        self.get_cached(EntityType::Recipe).await
    }

    pub async fn get_cached_ingredients(&self) -> Result<Vec<DomainRecord>, StorageError> {
        self.get_cached(EntityType::Ingredient).await
    }

    pub async fn get_cached_techniques(&self) -> Result<Vec<DomainRecord>, StorageError> {
        self.get_cached(EntityType::Technique).await
    }

    pub async fn get_cached_menus(&self) -> Result<Vec<DomainRecord>, StorageError> {
        self.get_cached(EntityType::Menu).await
    }

    pub async fn get_cached_record(&self, entity_type: EntityType, id: &str) -> Result<Option<DomainRecord>, StorageError> {
        let backend = self.backend()?;
        let collection = entity_type.collection();
        let record = read_json(backend.as_ref(), collection, id).await?;
        crate::metrics::record_store_operation(collection.name(), "get", if record.is_some() { "hit" } else { "miss" });
        Ok(record)
    }

    /// Change only the sync status (and the fields it implies).
    /// Returns `false` if the record is not cached.
    pub async fn update_sync_status(&self, entity_type: EntityType, id: &str, status: SyncStatus) -> Result<bool, StorageError> {
        let backend = self.backend()?;
        let collection = entity_type.collection();
        let Some(mut record) = read_json::<DomainRecord>(backend.as_ref(), collection, id).await? else {
            return Ok(false);
        };

        record.sync_status = status;
        if status == SyncStatus::Synced {
            let now = now_millis();
            record.last_synced_at = Some(record.last_synced_at.map_or(now, |p| p.max(now)));
            record.pending_operation = None;
        }

        write_json(backend.as_ref(), collection, id, &record).await?;
        crate::metrics::record_store_operation(collection.name(), "update_status", "success");
        debug!(entity_type = %entity_type, id = %id, status = %status, "Sync status updated");
        self.notify(|o| o.on_upsert(&record));
        Ok(true)
    }

    /// Remove one entity. The caller ensures no queue item still needs it.
    pub async fn delete_record(&self, entity_type: EntityType, id: &str) -> Result<(), StorageError> {
        let backend = self.backend()?;
        let collection = entity_type.collection();
        backend.delete(collection, id).await?;
        crate::metrics::record_store_operation(collection.name(), "delete", "success");
        self.notify(|o| o.on_remove(entity_type, id));
        Ok(())
    }

    // ───────────────────────── sync queue ─────────────────────────

    pub async fn add_to_sync_queue(&self, item: &SyncQueueItem) -> Result<(), StorageError> {
        let backend = self.backend()?;
        write_json(backend.as_ref(), Collection::SyncQueue, &item.id, item).await?;
        crate::metrics::record_store_operation(Collection::SyncQueue.name(), "put", "success");
        Ok(())
    }

    /// Overwrite a queued item in place (retry bookkeeping).
    pub async fn update_sync_queue_item(&self, item: &SyncQueueItem) -> Result<(), StorageError> {
        self.add_to_sync_queue(item).await
    }

    /// All queued items, oldest first (ties broken by id).
    pub async fn get_sync_queue(&self) -> Result<Vec<SyncQueueItem>, StorageError> {
        let backend = self.backend()?;
        let _timer = crate::time_operation!(Collection::SyncQueue.name(), "scan");
        let mut items: Vec<SyncQueueItem> = scan_json(backend.as_ref(), Collection::SyncQueue).await?;
        items.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    /// Whether any queue item still targets this entity.
    pub async fn has_queued_item(&self, entity_type: EntityType, id: &str) -> Result<bool, StorageError> {
        let backend = self.backend()?;
        let items: Vec<SyncQueueItem> = scan_json(backend.as_ref(), Collection::SyncQueue).await?;
        Ok(items.iter().any(|item| item.entity_type() == entity_type && item.entity_id() == id))
    }

    pub async fn get_sync_queue_item(&self, id: &str) -> Result<Option<SyncQueueItem>, StorageError> {
        let backend = self.backend()?;
        read_json(backend.as_ref(), Collection::SyncQueue, id).await
    }

    pub async fn remove_from_sync_queue(&self, id: &str) -> Result<(), StorageError> {
        let backend = self.backend()?;
        backend.delete(Collection::SyncQueue, id).await?;
        crate::metrics::record_store_operation(Collection::SyncQueue.name(), "delete", "success");
        Ok(())
    }

    pub async fn clear_sync_queue(&self) -> Result<(), StorageError> {
        let backend = self.backend()?;
        backend.clear(Collection::SyncQueue).await?;
        info!("Sync queue cleared");
        Ok(())
    }

    // ───────────────────────── images ─────────────────────────

    pub async fn cache_image(&self, url: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        let backend = self.backend()?;
        let image = CachedImage {
            url: url.to_string(),
            content_type: content_type.to_string(),
            cached_at: now_millis(),
            data,
        };
        backend.put(Collection::Images, url, image.encode()?).await?;
        crate::metrics::record_store_operation(Collection::Images.name(), "put", "success");
        Ok(())
    }

    pub async fn get_cached_image(&self, url: &str) -> Result<Option<CachedImage>, StorageError> {
        let backend = self.backend()?;
        match backend.get(Collection::Images, url).await? {
            Some(bytes) => Ok(Some(CachedImage::decode(url, &bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_cached_image(&self, url: &str) -> Result<(), StorageError> {
        let backend = self.backend()?;
        backend.delete(Collection::Images, url).await
    }

    // ───────────────────────── metadata ─────────────────────────

    pub async fn set_metadata(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let backend = self.backend()?;
        write_json(backend.as_ref(), Collection::Metadata, key, value).await
    }

    pub async fn get_metadata(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let backend = self.backend()?;
        read_json(backend.as_ref(), Collection::Metadata, key).await
    }

    // ───────────────────────── maintenance ─────────────────────────

    pub async fn get_storage_stats(&self) -> Result<StorageStats, StorageError> {
        let backend = self.backend()?;

        let mut per_type = BTreeMap::new();
        let mut total_bytes = 0;
        for entity_type in EntityType::ALL {
            let rows = backend.scan(entity_type.collection()).await?;
            let mut stats = CollectionStats::default();
            for (_, bytes) in &rows {
                stats.count += 1;
                stats.bytes += bytes.len();
                if let Ok(record) = serde_json::from_slice::<DomainRecord>(bytes) {
                    match record.sync_status {
                        SyncStatus::Pending => stats.pending += 1,
                        SyncStatus::Conflict => stats.conflicted += 1,
                        SyncStatus::Synced => {}
                    }
                }
            }
            total_bytes += stats.bytes;
            per_type.insert(entity_type, stats);
        }

        let (queue_len, queue_bytes) = backend.usage(Collection::SyncQueue).await?;
        let (image_count, image_bytes) = backend.usage(Collection::Images).await?;
        total_bytes += queue_bytes + image_bytes;

        Ok(StorageStats {
            per_type,
            queue_len,
            images: ImageStats { count: image_count, bytes: image_bytes },
            total_bytes,
            backend: backend.kind(),
            durable: backend.kind().is_durable(),
        })
    }

    /// Wipe every collection, then re-stamp the schema version.
    #[tracing::instrument(skip(self))]
    pub async fn clear_all_data(&self) -> Result<(), StorageError> {
        let backend = self.backend()?;
        backend.clear_all().await?;
        stamp_schema(backend.as_ref()).await?;
        self.notify(|o| o.on_clear());
        info!("All local data cleared");
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(backend: &dyn KvBackend, collection: Collection, key: &str) -> Result<Option<T>, StorageError> {
    match backend.get(collection, key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

async fn write_json<T: Serialize + ?Sized>(backend: &dyn KvBackend, collection: Collection, key: &str, value: &T) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec(value)?;
    backend.put(collection, key, bytes).await
}

async fn scan_json<T: DeserializeOwned>(backend: &dyn KvBackend, collection: Collection) -> Result<Vec<T>, StorageError> {
    let rows = backend.scan(collection).await?;
    let mut out = Vec::with_capacity(rows.len());
    for (key, bytes) in rows {
        match serde_json::from_slice(&bytes) {
            Ok(value) => out.push(value),
            Err(e) => {
                warn!(collection = %collection, key = %key, error = %e, "Skipping undecodable row");
                crate::metrics::record_corruption(collection.name());
            }
        }
    }
    Ok(out)
}

async fn stamp_schema(backend: &dyn KvBackend) -> Result<(), StorageError> {
    write_json(backend, Collection::Metadata, SCHEMA_VERSION_KEY, &SCHEMA_VERSION).await
}

/// Stamp a fresh store, migrate an older one, refuse a newer one.
async fn ensure_schema(backend: &dyn KvBackend) -> Result<(), StorageError> {
    let stored: Option<u32> = read_json(backend, Collection::Metadata, SCHEMA_VERSION_KEY).await?;
    match stored {
        None => stamp_schema(backend).await,
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        Some(v) if v < SCHEMA_VERSION => {
            migrate(backend, v).await?;
            stamp_schema(backend).await
        }
        Some(v) => Err(StorageError::Backend(format!(
            "Store schema version {} is newer than supported version {}",
            v, SCHEMA_VERSION
        ))),
    }
}

/// Rewrite every record and queue item so fields added since `from`
/// are materialized with their defaults.
async fn migrate(backend: &dyn KvBackend, from: u32) -> Result<(), StorageError> {
    info!(from, to = SCHEMA_VERSION, "Migrating store schema");
    let mut rewritten = 0usize;
    for entity_type in EntityType::ALL {
        let collection = entity_type.collection();
        for record in scan_json::<DomainRecord>(backend, collection).await? {
            write_json(backend, collection, record.id(), &record).await?;
            rewritten += 1;
        }
    }
    for item in scan_json::<SyncQueueItem>(backend, Collection::SyncQueue).await? {
        write_json(backend, Collection::SyncQueue, &item.id, &item).await?;
        rewritten += 1;
    }
    info!(rewritten, "Schema migration complete");
    Ok(())
}
