//! The seam between the sync engine and the remote source of truth.
//!
//! The concrete API lives outside this crate. Anything that can apply one
//! mutation implements [`RemoteApplier`]; closures can be adapted with
//! [`RemoteFn`].

use std::future::Future;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::queue_item::{ConflictResolution, SyncQueueItem};
use crate::record::{EntityType, SyncOperation};
use crate::storage::traits::StorageError;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Transient remote failure; retried with backoff
    #[error("Network error: {0}")]
    Network(String),
    /// Remote state diverged; not retried automatically under the manual policy
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Invalid queue item: {0}")]
    Validation(String),
}

impl SyncError {
    /// Conflict-classified errors: the `Conflict` variant, or any error whose
    /// message mentions a conflict (remotes often only give a status line).
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Storage(_) => false,
            other => other.to_string().to_ascii_lowercase().contains("conflict"),
        }
    }
}

/// One mutation as handed to the remote.
#[derive(Debug, Clone)]
pub struct RemoteRequest {
    pub item_id: String,
    pub operation: SyncOperation,
    pub entity_type: EntityType,
    pub payload: Value,
    pub conflict_resolution: ConflictResolution,
    /// 0 on first attempt
    pub attempt: u32,
}

impl From<&SyncQueueItem> for RemoteRequest {
    fn from(item: &SyncQueueItem) -> Self {
        Self {
            item_id: item.id.clone(),
            operation: item.operation,
            entity_type: item.entity_type(),
            payload: item.payload.data().clone(),
            conflict_resolution: item.conflict_resolution,
            attempt: item.retry_count,
        }
    }
}

#[async_trait]
pub trait RemoteApplier: Send + Sync {
    /// Apply one mutation remotely, returning the remote's view of the entity.
    async fn apply(&self, request: RemoteRequest) -> Result<Value, SyncError>;
}

/// Adapts an async closure into a [`RemoteApplier`].
pub struct RemoteFn<F>(pub F);

#[async_trait]
impl<F, Fut> RemoteApplier for RemoteFn<F>
where
    F: Fn(RemoteRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, SyncError>> + Send + 'static,
{
    async fn apply(&self, request: RemoteRequest) -> Result<Value, SyncError> {
        (self.0)(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conflict_classification() {
        assert!(SyncError::Conflict("etag mismatch".into()).is_conflict());
        assert!(SyncError::Network("409 Conflict".into()).is_conflict());
        assert!(SyncError::Network("write conflict detected".into()).is_conflict());
        assert!(!SyncError::Network("503 Service Unavailable".into()).is_conflict());
        assert!(!SyncError::Storage(StorageError::Backend("conflict".into())).is_conflict());
    }

    #[tokio::test]
    async fn test_remote_fn_adapter() {
        let remote = RemoteFn(|req: RemoteRequest| async move {
            Ok::<_, SyncError>(json!({"echo": req.payload["id"]}))
        });

        let request = RemoteRequest {
            item_id: "q1".into(),
            operation: SyncOperation::Create,
            entity_type: EntityType::Technique,
            payload: json!({"id": "stir"}),
            conflict_resolution: ConflictResolution::Manual,
            attempt: 0,
        };

        let result = remote.apply(request).await.unwrap();
        assert_eq!(result["echo"], "stir");
    }
}
