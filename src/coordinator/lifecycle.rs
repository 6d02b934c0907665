//! Manager lifecycle: initialize and shutdown.

use std::time::Instant;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::OfflineError;

use super::{ManagerState, OfflineManager};

impl OfflineManager {
    /// Open the store, load cache metadata and arm background sync.
    ///
    /// Idempotent: concurrent and repeated calls share one initialization.
    /// A failed attempt leaves the manager in `Created` and may be retried.
    #[tracing::instrument(skip(self))]
    pub async fn initialize(&self) -> Result<(), OfflineError> {
        self.init
            .get_or_try_init(|| async {
                let start = Instant::now();
                let _ = self.state.send(ManagerState::Initializing);

                match self.open().await {
                    Ok(entries) => {
                        let _ = self.state.send(ManagerState::Running);
                        crate::metrics::record_startup_phase("manager_init", start.elapsed());
                        info!(
                            entries,
                            backend = ?self.store.backend_kind(),
                            "Offline manager ready"
                        );
                        Ok(())
                    }
                    Err(e) => {
                        warn!(error = %e, "Offline manager failed to initialize");
                        let _ = self.state.send(ManagerState::Created);
                        Err(e)
                    }
                }
            })
            .await?;
        Ok(())
    }

    async fn open(&self) -> Result<usize, OfflineError> {
        self.store.initialize().await?;
        let entries = self.cache.load_cache_metadata().await?;
        self.sync.set_network_condition(self.connectivity.condition());
        self.sync.start();
        Ok(entries)
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.init.initialized()
    }

    /// Stop background sync and wait for a drain in progress to settle.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("Shutting down offline manager");
        let _ = self.state.send(ManagerState::ShuttingDown);
        self.sync.shutdown().await;
        let _ = self.state.send(ManagerState::Stopped);
        info!("Offline manager stopped");
    }

    #[must_use]
    pub fn state(&self) -> ManagerState {
        *self.state_rx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ManagerState> {
        self.state_rx.clone()
    }
}
