use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};
use super::traits::{BackendKind, Collection, KvBackend, StorageError};

/// Namespaced key-value fallback.
///
/// Every collection lives in one flat map under `"{collection}:{key}"`,
/// the same layout a browser-style string store would use.
///
/// Opened with [`MemoryBackend::open_file`], every mutation is written
/// through to a JSON snapshot so the data survives a restart. Each write
/// rewrites the whole snapshot.
pub struct MemoryBackend {
    data: DashMap<String, Vec<u8>>,
    namespace: String,
    snapshot: Option<Snapshot>,
}

struct Snapshot {
    path: PathBuf,
    // Serializes rewrites so the last one on disk is the newest
    write_lock: tokio::sync::Mutex<()>,
}

fn io_err(path: &Path, e: std::io::Error) -> StorageError {
    StorageError::Backend(format!("{}: {}", path.display(), e))
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::with_namespace("birch")
    }

    #[must_use]
    pub fn with_namespace(namespace: &str) -> Self {
        Self {
            data: DashMap::new(),
            namespace: namespace.to_string(),
            snapshot: None,
        }
    }

    /// Load the snapshot at `path`, creating it if absent.
    ///
    /// Fails if the file is unreadable, undecodable or cannot be written.
    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let stored: BTreeMap<String, Vec<u8>> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(io_err(&path, e)),
        };
        let data: DashMap<String, Vec<u8>> = stored.into_iter().collect();

        let backend = Self {
            data,
            namespace: "birch".to_string(),
            snapshot: Some(Snapshot {
                path,
                write_lock: tokio::sync::Mutex::new(()),
            }),
        };
        backend.flush().await?;
        info!(keys = backend.len(), "Key-value snapshot loaded");
        Ok(backend)
    }

    /// Rewrite the snapshot file. No-op when memory-only.
    async fn flush(&self) -> Result<(), StorageError> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };
        let _guard = snapshot.write_lock.lock().await;
        let stored: BTreeMap<String, Vec<u8>> = self
            .data
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        let bytes = serde_json::to_vec(&stored)?;

        let mut tmp = snapshot.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| io_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &snapshot.path)
            .await
            .map_err(|e| io_err(&snapshot.path, e))?;
        debug!(keys = stored.len(), bytes = bytes.len(), "Snapshot written");
        Ok(())
    }

    fn prefix(&self, collection: Collection) -> String {
        format!("{}:{}:", self.namespace, collection.name())
    }

    fn full_key(&self, collection: Collection, key: &str) -> String {
        format!("{}{}", self.prefix(collection), key)
    }

    /// Get current key count across all collections
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        if self.snapshot.is_some() {
            BackendKind::File
        } else {
            BackendKind::Memory
        }
    }

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.get(&self.full_key(collection, key)).map(|r| r.value().clone()))
    }

    async fn put(&self, collection: Collection, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.data.insert(self.full_key(collection, key), value);
        self.flush().await
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<(), StorageError> {
        if self.data.remove(&self.full_key(collection, key)).is_some() {
            self.flush().await?;
        }
        Ok(())
    }

    async fn scan(&self, collection: Collection) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let prefix = self.prefix(collection);
        Ok(self
            .data
            .iter()
            .filter_map(|r| {
                r.key()
                    .strip_prefix(&prefix)
                    .map(|k| (k.to_string(), r.value().clone()))
            })
            .collect())
    }

    async fn clear(&self, collection: Collection) -> Result<(), StorageError> {
        let prefix = self.prefix(collection);
        self.data.retain(|k, _| !k.starts_with(&prefix));
        self.flush().await
    }
}
