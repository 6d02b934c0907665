use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::record::PayloadError;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store used before initialize()")]
    NotInitialized,
    #[error(transparent)]
    InvalidPayload(#[from] PayloadError),
}

/// Named collections of the versioned schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Recipes,
    Ingredients,
    Techniques,
    Menus,
    SyncQueue,
    Images,
    Metadata,
}

impl Collection {
    pub const ALL: [Collection; 7] = [
        Collection::Recipes,
        Collection::Ingredients,
        Collection::Techniques,
        Collection::Menus,
        Collection::SyncQueue,
        Collection::Images,
        Collection::Metadata,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Recipes => "recipes",
            Self::Ingredients => "ingredients",
            Self::Techniques => "techniques",
            Self::Menus => "menus",
            Self::SyncQueue => "syncQueue",
            Self::Images => "images",
            Self::Metadata => "metadata",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which engine is serving a [`super::PersistentStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Transactional SQLite database
    Sqlite,
    /// Key-value fallback written through to a snapshot file
    File,
    /// Key-value fallback held in process memory only
    Memory,
}

impl BackendKind {
    /// Whether data written through this backend survives a restart.
    #[must_use]
    pub fn is_durable(self) -> bool {
        !matches!(self, Self::Memory)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::File => write!(f, "file"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Raw key-value engine underneath the persistent store.
///
/// Values are opaque bytes; the store layers typing and serialization on top.
#[async_trait]
pub trait KvBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn put(&self, collection: Collection, key: &str, value: Vec<u8>) -> Result<(), StorageError>;
    async fn delete(&self, collection: Collection, key: &str) -> Result<(), StorageError>;

    /// All values in a collection as `(key, value)` pairs, in no particular order.
    async fn scan(&self, collection: Collection) -> Result<Vec<(String, Vec<u8>)>, StorageError>;

    async fn clear(&self, collection: Collection) -> Result<(), StorageError>;

    /// Number of entries and total value bytes in a collection.
    /// Default implementation scans.
    async fn usage(&self, collection: Collection) -> Result<(usize, usize), StorageError> {
        let rows = self.scan(collection).await?;
        let bytes = rows.iter().map(|(_, v)| v.len()).sum();
        Ok((rows.len(), bytes))
    }

    /// Wipe every collection.
    /// Default implementation clears collections one by one.
    async fn clear_all(&self) -> Result<(), StorageError> {
        for collection in Collection::ALL {
            self.clear(collection).await?;
        }
        Ok(())
    }
}
