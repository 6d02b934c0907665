//! Sync queue items.
//!
//! A [`SyncQueueItem`] is one local mutation waiting to be applied remotely.
//! Callers describe the mutation with a [`QueueItemDraft`]; the sync engine
//! fills the remaining fields from [`crate::SyncConfig`] when it enqueues it.
//!
//! # Example
//!
//! ```
//! use birch_offline::{EntityPayload, EntityType, QueueItemDraft, SyncOperation, SyncPriority, SyncStrategy};
//! use serde_json::json;
//!
//! let payload = EntityPayload::from_json(EntityType::Recipe, json!({"id": "r1"})).unwrap();
//! let draft = QueueItemDraft::new(SyncOperation::Update, payload)
//!     .priority(SyncPriority::Critical)
//!     .strategy(SyncStrategy::Immediate);
//! assert!(draft.is_immediate());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SyncConfig;
use crate::record::{now_millis, EntityPayload, EntityType, SizedItem, SyncOperation};
use crate::sync::remote::SyncError;

/// Dispatch priority; ordering is `Low < Normal < High < Critical`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for SyncPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// How soon an item should be dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStrategy {
    /// Dispatch at once (only honoured for critical items)
    Immediate,
    /// Wait for the next scheduled batch
    Batched,
    /// Let the scheduler pick, based on network condition
    #[default]
    Adaptive,
}

/// Minimum network quality an item needs before it may be sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkRequirement {
    #[default]
    Any,
    Wifi,
    Fast,
}

/// What to do when the remote reports diverged state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    /// Surface the conflict and wait for the application
    #[default]
    Manual,
    /// Ask the remote to overwrite with the local copy
    LastWriteWins,
    /// Ask the remote to merge both copies
    Merge,
}

/// Where an item is in its lifecycle.
///
/// `Batched` and `InFlight` are transient and never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueItemState {
    #[default]
    Queued,
    Batched,
    InFlight,
    RetryScheduled,
    /// Surfaced to the application; no automatic retry
    Conflict,
}

/// A persisted, pending remote mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: String,
    pub operation: SyncOperation,
    pub payload: EntityPayload,
    /// Enqueue time (epoch millis); queue order key
    pub timestamp: i64,
    pub retry_count: u32,
    pub priority: SyncPriority,
    pub strategy: SyncStrategy,
    pub network_requirement: NetworkRequirement,
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    /// Not eligible for dispatch before this time (epoch millis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<i64>,
    pub conflict_resolution: ConflictResolution,
    /// Ids of entities this mutation depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub state: QueueItemState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SyncQueueItem {
    #[must_use]
    pub fn entity_type(&self) -> EntityType {
        self.payload.entity_type()
    }

    #[must_use]
    pub fn entity_id(&self) -> &str {
        self.payload.id()
    }

    /// Critical items with the immediate strategy skip batching.
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        self.priority == SyncPriority::Critical && self.strategy == SyncStrategy::Immediate
    }

    /// Eligible for the next batch: not conflicted, and any backoff has elapsed.
    #[must_use]
    pub fn is_due(&self, now: i64) -> bool {
        self.state != QueueItemState::Conflict && self.scheduled_for.map_or(true, |t| t <= now)
    }

    /// Context attached to `conflict-detected` events.
    #[must_use]
    pub fn conflict_context(&self) -> Value {
        serde_json::json!({
            "itemId": self.id,
            "entityType": self.entity_type(),
            "entityId": self.entity_id(),
            "operation": self.operation,
            "retryCount": self.retry_count,
            "resolution": self.conflict_resolution,
            "error": self.last_error,
            "payload": self.payload.data(),
        })
    }
}

impl SizedItem for SyncQueueItem {
    fn size_bytes(&self) -> usize {
        self.payload.data().to_string().len() + self.id.len() + 64
    }
}

/// Caller-side description of a mutation to enqueue.
#[derive(Debug, Clone)]
pub struct QueueItemDraft {
    pub operation: SyncOperation,
    pub payload: EntityPayload,
    pub priority: Option<SyncPriority>,
    pub strategy: Option<SyncStrategy>,
    pub network_requirement: Option<NetworkRequirement>,
    pub max_retries: Option<u32>,
    pub backoff_multiplier: Option<f64>,
    pub conflict_resolution: Option<ConflictResolution>,
    pub dependencies: Vec<String>,
}

impl QueueItemDraft {
    pub fn new(operation: SyncOperation, payload: EntityPayload) -> Self {
        Self {
            operation,
            payload,
            priority: None,
            strategy: None,
            network_requirement: None,
            max_retries: None,
            backoff_multiplier: None,
            conflict_resolution: None,
            dependencies: Vec::new(),
        }
    }

    #[must_use]
    pub fn priority(mut self, priority: SyncPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn strategy(mut self, strategy: SyncStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    #[must_use]
    pub fn network_requirement(mut self, requirement: NetworkRequirement) -> Self {
        self.network_requirement = Some(requirement);
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    #[must_use]
    pub fn conflict_resolution(mut self, resolution: ConflictResolution) -> Self {
        self.conflict_resolution = Some(resolution);
        self
    }

    #[must_use]
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    #[must_use]
    pub fn is_immediate(&self) -> bool {
        self.priority == Some(SyncPriority::Critical) && self.strategy == Some(SyncStrategy::Immediate)
    }

    /// Reject overrides no queue item may carry.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.max_retries == Some(0) {
            return Err(SyncError::Validation("max_retries must be at least 1".into()));
        }
        if let Some(multiplier) = self.backoff_multiplier {
            if !(multiplier >= 1.0 && multiplier.is_finite()) {
                return Err(SyncError::Validation(format!(
                    "backoff_multiplier must be a finite value >= 1, got {multiplier}"
                )));
            }
        }
        Ok(())
    }

    /// Fill unset fields from `defaults` and stamp id and timestamp.
    pub fn build(self, defaults: &SyncConfig) -> SyncQueueItem {
        SyncQueueItem {
            id: uuid::Uuid::new_v4().to_string(),
            operation: self.operation,
            payload: self.payload,
            timestamp: now_millis(),
            retry_count: 0,
            priority: self.priority.unwrap_or_default(),
            strategy: self.strategy.unwrap_or_default(),
            network_requirement: self.network_requirement.unwrap_or_default(),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(defaults.backoff_multiplier),
            scheduled_for: None,
            conflict_resolution: self.conflict_resolution.unwrap_or(defaults.conflict_resolution),
            dependencies: self.dependencies,
            state: QueueItemState::Queued,
            last_error: None,
        }
    }
}
