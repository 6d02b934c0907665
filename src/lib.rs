//! # Birch Offline
//!
//! The offline-first data layer of the Birch Lounge cocktail manager.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       OfflineManager                        │
//! │  • One API surface and one event stream for the app         │
//! │  • Connectivity monitoring (online / slow / offline)        │
//! └─────────────────────────────────────────────────────────────┘
//!            │ reads                          │ mutations
//!            ▼                                ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────┐
//! │        CacheEngine        │   │         SyncEngine          │
//! │  • Priority-ranked index  │   │  • Persisted mutation queue │
//! │  • Staleness, eviction    │   │  • Network-adaptive batches │
//! │  • Predictive prefetch    │   │  • Backoff, conflicts       │
//! └───────────────────────────┘   └─────────────────────────────┘
//!            │                                │
//!            ▼                                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PersistentStore                        │
//! │  • recipes, ingredients, techniques, menus                  │
//! │  • sync_queue, images, metadata                             │
//! │  • SQLite, or a namespaced key-value fallback               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use birch_offline::{
//!     EntityPayload, EntityType, OfflineConfig, OfflineManager, QueueItemDraft,
//!     RemoteFn, RemoteRequest, SyncError, SyncOperation,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = OfflineConfig {
//!         database_path: Some("./birch.db".into()),
//!         ..Default::default()
//!     };
//!
//!     // The remote API lives outside this crate
//!     let remote = Arc::new(RemoteFn(|req: RemoteRequest| async move { Ok::<_, SyncError>(req.payload) }));
//!     let manager = OfflineManager::new(config, remote).expect("valid config");
//!     manager.initialize().await.expect("Failed to initialize");
//!
//!     // Data fetched from the remote is cached as synced
//!     manager.cache_recipe(json!({"id": "negroni", "name": "Negroni"})).await.unwrap();
//!
//!     // Local edits are stored as pending and queued
//!     let edit = EntityPayload::from_json(
//!         EntityType::Recipe,
//!         json!({"id": "negroni", "name": "Negroni", "favorite": true}),
//!     ).unwrap();
//!     manager.queue_sync(QueueItemDraft::new(SyncOperation::Update, edit)).await.unwrap();
//!
//!     // Reads go through the cache engine's access tracking
//!     if let Some(record) = manager.get_record(EntityType::Recipe, "negroni").await.unwrap() {
//!         println!("{} is {}", record.id(), record.sync_status);
//!     }
//!
//!     manager.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: the [`OfflineManager`] facade and connectivity monitor
//! - [`storage`]: [`PersistentStore`] and its SQLite / memory backends
//! - [`cache`]: the [`CacheEngine`], priority policy and eviction strategies
//! - [`sync`]: the [`SyncEngine`], queue items, batching and events
//! - [`resilience`]: retry and backoff
//! - [`pressure`]: cache pressure levels

pub mod config;
pub mod error;
pub mod record;
pub mod storage;
pub mod cache;
pub mod sync;
pub mod resilience;
pub mod pressure;
pub mod coordinator;
pub mod metrics;

pub use config::{CacheConfig, OfflineConfig, SyncConfig};
pub use error::{ConfigurationError, EvictionError, OfflineError};
pub use record::{DomainRecord, EntityPayload, EntityType, PayloadError, SyncOperation, SyncStatus};
pub use storage::persistent::{CachedImage, StorageStats, StoreObserver};
pub use storage::traits::{BackendKind, KvBackend, StorageError};
pub use storage::PersistentStore;
pub use cache::{CacheEngine, CacheEntry, CacheKey, CacheStats, CacheStrategy, OptimizationReport, TrackedStore};
pub use pressure::CachePressure;
pub use sync::queue_item::{
    ConflictResolution, NetworkRequirement, QueueItemDraft, QueueItemState, SyncPriority, SyncQueueItem, SyncStrategy,
};
pub use sync::network::{ConnectionType, NetworkCondition, NetworkCost, NetworkSpeed};
pub use sync::{
    BatchResult, ConflictAction, RemoteApplier, RemoteFn, RemoteRequest, Subscription, SyncEngine, SyncError,
    SyncEvent, SyncEventKind, SyncRun, SyncStats,
};
pub use sync::batch::SyncBatch;
pub use coordinator::{ConnectivityStatus, ManagerState, OfflineManager, SyncCounts};
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
