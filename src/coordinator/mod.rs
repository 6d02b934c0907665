// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The offline manager facade.
//!
//! [`OfflineManager`] wires together:
//! - the [`PersistentStore`] holding records, the sync queue and images
//! - the [`CacheEngine`] ranking what stays resident
//! - the [`SyncEngine`] draining local mutations to the remote
//! - a [`ConnectivityMonitor`] fed by the host's platform signals
//!
//! and exposes one API surface and one event stream.
//!
//! # Lifecycle
//!
//! ```text
//! Created → Initializing → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use birch_offline::{OfflineConfig, OfflineManager, ManagerState, RemoteFn, RemoteRequest, SyncError};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let remote = Arc::new(RemoteFn(|req: RemoteRequest| async move { Ok::<_, SyncError>(req.payload) }));
//! let manager = OfflineManager::new(OfflineConfig::default(), remote).expect("valid config");
//! assert_eq!(manager.state(), ManagerState::Created);
//!
//! manager.initialize().await.expect("init failed");
//! manager.cache_recipe(json!({"id": "negroni", "name": "Negroni"})).await.unwrap();
//! # }
//! ```

mod types;
mod api;
mod lifecycle;
pub mod connectivity;

pub use types::{ManagerState, SyncCounts};
pub use connectivity::{ConnectivityMonitor, ConnectivityStatus};

use std::sync::Arc;
use tokio::sync::{watch, OnceCell};

use crate::cache::{CacheEngine, TrackedStore};
use crate::config::OfflineConfig;
use crate::error::ConfigurationError;
use crate::storage::PersistentStore;
use crate::sync::remote::RemoteApplier;
use crate::sync::SyncEngine;

/// Single integration point for the offline data layer.
///
/// The manager is `Send + Sync`; share it behind an `Arc`.
pub struct OfflineManager {
    pub(super) config: OfflineConfig,

    /// Lifecycle state (broadcast to watchers)
    pub(super) state: watch::Sender<ManagerState>,
    pub(super) state_rx: watch::Receiver<ManagerState>,

    pub(super) store: Arc<PersistentStore>,
    pub(super) cache: Arc<CacheEngine>,
    /// Reads that drive access tracking
    pub(super) tracked: TrackedStore,
    pub(super) sync: Arc<SyncEngine>,
    pub(super) connectivity: ConnectivityMonitor,

    /// Set once initialization succeeds
    pub(super) init: OnceCell<()>,
}

impl OfflineManager {
    /// Validate `config` and build the components. Nothing is opened until
    /// [`Self::initialize`].
    pub fn new(config: OfflineConfig, remote: Arc<dyn RemoteApplier>) -> Result<Self, ConfigurationError> {
        let store = Arc::new(PersistentStore::new(config.database_path.clone()));
        Self::with_store(config, store, remote)
    }

    /// Build around an existing store (e.g. one with an injected backend).
    pub fn with_store(
        config: OfflineConfig,
        store: Arc<PersistentStore>,
        remote: Arc<dyn RemoteApplier>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let cache = CacheEngine::new(store.clone(), config.cache.clone());
        let tracked = TrackedStore::new(store.clone(), cache.clone());
        let sync = SyncEngine::new(store.clone(), remote, config.sync.clone());
        let (state, state_rx) = watch::channel(ManagerState::Created);

        Ok(Self {
            config,
            state,
            state_rx,
            store,
            cache,
            tracked,
            sync,
            connectivity: ConnectivityMonitor::new(),
            init: OnceCell::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<PersistentStore> {
        &self.store
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheEngine> {
        &self.cache
    }

    #[must_use]
    pub fn sync_engine(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    #[must_use]
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }
}

impl std::fmt::Debug for OfflineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineManager")
            .field("state", &self.state())
            .field("connectivity", &self.connectivity.status())
            .field("backend", &self.store.backend_kind())
            .finish_non_exhaustive()
    }
}
