//! Error types shared across layers.
//!
//! Each layer owns its error enum (`StorageError`, `SyncError`,
//! `EvictionError`); [`OfflineError`] folds them together for the
//! [`crate::OfflineManager`] facade.

use thiserror::Error;

use crate::record::PayloadError;
use crate::storage::traits::StorageError;
use crate::sync::remote::SyncError;

/// An option value outside its allowed range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Invalid configuration value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: &'static str },
}

impl ConfigurationError {
    pub(crate) fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::InvalidValue { field, reason }
    }
}

/// Failed removal of a single cache entry. Logged, never propagated.
#[derive(Error, Debug)]
#[error("Failed to evict '{id}': {source}")]
pub struct EvictionError {
    pub id: String,
    #[source]
    pub source: StorageError,
}

/// Any error the facade can return.
#[derive(Error, Debug)]
pub enum OfflineError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}
