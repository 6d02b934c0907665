// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite backend: the transactional primary engine.
//!
//! Every collection shares one table, keyed by `(collection, key)`:
//!
//! ```sql
//! CREATE TABLE kv_store (
//!   collection TEXT NOT NULL,
//!   key        TEXT NOT NULL,
//!   value      BLOB NOT NULL,
//!   updated_at INTEGER NOT NULL,
//!   PRIMARY KEY (collection, key)
//! )
//! ```
//!
//! Values are opaque bytes (JSON for records and queue items, raw bytes for
//! images). Reads through the sqlx `Any` driver may surface BLOBs as either
//! bytes or text, so both are accepted.

use async_trait::async_trait;
use sqlx::{AnyPool, Row, any::AnyPoolOptions};
use std::path::Path;
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, info};

use super::traits::{BackendKind, Collection, KvBackend, StorageError};
use crate::record::now_millis;
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn backend_err(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn read_value(row: &sqlx::any::AnyRow) -> Result<Vec<u8>, StorageError> {
    row.try_get::<Vec<u8>, _>("value")
        .or_else(|_| row.try_get::<String, _>("value").map(String::into_bytes))
        .map_err(backend_err)
}

pub struct SqliteBackend {
    pool: AnyPool,
    path: String,
}

impl SqliteBackend {
    /// Open (or create) the database file with startup-mode retry.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        install_drivers();

        let path_str = path.as_ref().to_string_lossy().to_string();
        let url = format!("sqlite://{}?mode=rwc", path_str);

        let pool = retry("sqlite_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&url)
                .await
                .map_err(backend_err)
        })
        .await?;

        let backend = Self { pool, path: path_str };
        backend.enable_wal_mode().await?;
        backend.init_schema().await?;
        info!(path = %backend.path, "SQLite store opened");
        Ok(backend)
    }

    /// Path of the database file.
    pub fn path(&self) -> &str {
        &self.path
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }
}

#[async_trait]
impl KvBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE collection = ? AND key = ?")
            .bind(collection.name())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;

        row.map(|r| read_value(&r)).transpose()
    }

    async fn put(&self, collection: Collection, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO kv_store (collection, key, value, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(collection, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(collection.name())
        .bind(key)
        .bind(value)
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv_store WHERE collection = ? AND key = ?")
            .bind(collection.name())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn scan(&self, collection: Collection) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let rows = sqlx::query("SELECT key, value FROM kv_store WHERE collection = ?")
            .bind(collection.name())
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;

        rows.iter()
            .map(|row| {
                let key: String = row.try_get("key").map_err(backend_err)?;
                Ok((key, read_value(row)?))
            })
            .collect()
    }

    async fn clear(&self, collection: Collection) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv_store WHERE collection = ?")
            .bind(collection.name())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn usage(&self, collection: Collection) -> Result<(usize, usize), StorageError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt, COALESCE(SUM(LENGTH(value)), 0) AS bytes FROM kv_store WHERE collection = ?",
        )
        .bind(collection.name())
        .fetch_one(&self.pool)
        .await
        .map_err(backend_err)?;

        let count: i64 = row.try_get("cnt").map_err(backend_err)?;
        let bytes: i64 = row.try_get("bytes").map_err(backend_err)?;
        Ok((count as usize, bytes as usize))
    }

    /// Single transaction, so a failure leaves every collection intact.
    async fn clear_all(&self) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        sqlx::query("DELETE FROM kv_store")
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        tx.commit().await.map_err(backend_err)?;
        debug!(path = %self.path, "All collections cleared");
        Ok(())
    }
}
