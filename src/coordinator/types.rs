//! Public types for the offline manager.

use serde::Serialize;

/// Manager lifecycle state.
///
/// Use [`super::OfflineManager::state()`] to check the current state or
/// [`super::OfflineManager::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManagerState {
    /// Just created, not yet initialized
    Created,
    /// Opening the store and loading cache metadata
    Initializing,
    /// Store open, background sync armed
    Running,
    /// Graceful shutdown in progress
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Aggregate sync position of the local data, for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    /// Records with local edits not yet applied remotely
    pub pending: usize,
    pub synced: usize,
    /// Records whose mutation hit a conflict awaiting resolution
    pub conflicted: usize,
    /// Items in the persisted sync queue
    pub queued: usize,
}

impl SyncCounts {
    /// Everything local has reached the remote.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.conflicted == 0 && self.queued == 0
    }
}
