// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Domain records and their sync metadata.
//!
//! A [`DomainRecord`] is a locally cached copy of one entity (recipe,
//! ingredient, technique or menu) plus the bookkeeping the sync engine needs
//! to know whether the copy matches the remote source of truth.
//!
//! # Example
//!
//! ```
//! use birch_offline::{EntityPayload, EntityType, DomainRecord, SyncStatus};
//! use serde_json::json;
//!
//! let payload = EntityPayload::from_json(
//!     EntityType::Recipe,
//!     json!({"id": "negroni", "name": "Negroni", "isFavorite": true}),
//! ).unwrap();
//!
//! let record = DomainRecord::new(payload, SyncStatus::Synced);
//! assert_eq!(record.id(), "negroni");
//! assert!(record.last_synced_at.is_some());
//! ```

use std::sync::OnceLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::traits::Collection;

/// Current wall clock as epoch millis.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Trait for items that know their own size
pub trait SizedItem {
    #[must_use]
    fn size_bytes(&self) -> usize;
}

/// The four kinds of entity the cocktail manager stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    Recipe,
    Ingredient,
    Technique,
    Menu,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::Recipe,
        EntityType::Ingredient,
        EntityType::Technique,
        EntityType::Menu,
    ];

    /// Collection that holds records of this type.
    #[must_use]
    pub fn collection(&self) -> Collection {
        match self {
            Self::Recipe => Collection::Recipes,
            Self::Ingredient => Collection::Ingredients,
            Self::Technique => Collection::Techniques,
            Self::Menu => Collection::Menus,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recipe => "recipe",
            Self::Ingredient => "ingredient",
            Self::Technique => "technique",
            Self::Menu => "menu",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle tag on a cached entity copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    /// Local copy matches the remote as of `last_synced_at`
    Synced,
    /// Local edits not yet applied remotely
    Pending,
    /// Remote state diverged; waiting for resolution
    Conflict,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synced => write!(f, "synced"),
            Self::Pending => write!(f, "pending"),
            Self::Conflict => write!(f, "conflict"),
        }
    }
}

/// Mutation kind carried by queue items and pending records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Payload rejected at construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("{entity_type} payload must be a JSON object")]
    NotAnObject { entity_type: EntityType },
    #[error("{entity_type} payload is missing a non-empty string `id`")]
    MissingId { entity_type: EntityType },
}

/// Entity data tagged by its type.
///
/// Construction goes through [`EntityPayload::from_json`], which guarantees
/// the body is an object with a non-empty string `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum EntityPayload {
    Recipe(Value),
    Ingredient(Value),
    Technique(Value),
    Menu(Value),
}

impl EntityPayload {
    pub fn from_json(entity_type: EntityType, value: Value) -> Result<Self, PayloadError> {
        let obj = value
            .as_object()
            .ok_or(PayloadError::NotAnObject { entity_type })?;
        match obj.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => {}
            _ => return Err(PayloadError::MissingId { entity_type }),
        }
        Ok(match entity_type {
            EntityType::Recipe => Self::Recipe(value),
            EntityType::Ingredient => Self::Ingredient(value),
            EntityType::Technique => Self::Technique(value),
            EntityType::Menu => Self::Menu(value),
        })
    }

    #[must_use]
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Recipe(_) => EntityType::Recipe,
            Self::Ingredient(_) => EntityType::Ingredient,
            Self::Technique(_) => EntityType::Technique,
            Self::Menu(_) => EntityType::Menu,
        }
    }

    #[must_use]
    pub fn data(&self) -> &Value {
        match self {
            Self::Recipe(v) | Self::Ingredient(v) | Self::Technique(v) | Self::Menu(v) => v,
        }
    }

    #[must_use]
    pub fn into_data(self) -> Value {
        match self {
            Self::Recipe(v) | Self::Ingredient(v) | Self::Technique(v) | Self::Menu(v) => v,
        }
    }

    /// Entity id (validated non-empty at construction).
    #[must_use]
    pub fn id(&self) -> &str {
        self.data().get("id").and_then(Value::as_str).unwrap_or_default()
    }
}

/// Usage hints read from entity data that feed cache priority.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DomainSignals {
    pub favorite: bool,
    pub times_ordered: u64,
}

impl DomainSignals {
    pub fn from_data(data: &Value) -> Self {
        let favorite = ["isFavorite", "favorite"]
            .iter()
            .any(|k| data.get(*k).and_then(Value::as_bool).unwrap_or(false));
        let times_ordered = ["timesOrdered", "orderCount"]
            .iter()
            .filter_map(|k| data.get(*k).and_then(Value::as_u64))
            .max()
            .unwrap_or(0);
        Self { favorite, times_ordered }
    }
}

/// A cached entity plus sync metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRecord {
    pub payload: EntityPayload,
    pub sync_status: SyncStatus,
    /// Epoch millis of the last successful sync. Only set while synced at least once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<i64>,
    /// Epoch millis of the last local write
    pub local_modified_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_operation: Option<SyncOperation>,

    #[serde(skip)]
    cached_size: OnceLock<usize>,
}

impl DomainRecord {
    pub fn new(payload: EntityPayload, sync_status: SyncStatus) -> Self {
        let now = now_millis();
        Self {
            payload,
            sync_status,
            last_synced_at: (sync_status == SyncStatus::Synced).then_some(now),
            local_modified_at: now,
            pending_operation: None,
            cached_size: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.payload.id()
    }

    #[must_use]
    pub fn entity_type(&self) -> EntityType {
        self.payload.entity_type()
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }

    #[must_use]
    pub fn signals(&self) -> DomainSignals {
        DomainSignals::from_data(self.payload.data())
    }
}

impl SizedItem for DomainRecord {
    fn size_bytes(&self) -> usize {
        *self.cached_size.get_or_init(|| {
            std::mem::size_of::<Self>() + self.payload.data().to_string().len()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recipe(id: &str) -> EntityPayload {
        EntityPayload::from_json(EntityType::Recipe, json!({"id": id, "name": "Daiquiri"})).unwrap()
    }

    #[test]
    fn test_payload_requires_object() {
        let err = EntityPayload::from_json(EntityType::Menu, json!([1, 2])).unwrap_err();
        assert_eq!(err, PayloadError::NotAnObject { entity_type: EntityType::Menu });
    }

    #[test]
    fn test_payload_requires_id() {
        let err = EntityPayload::from_json(EntityType::Recipe, json!({"name": "x"})).unwrap_err();
        assert_eq!(err, PayloadError::MissingId { entity_type: EntityType::Recipe });

        let err = EntityPayload::from_json(EntityType::Recipe, json!({"id": ""})).unwrap_err();
        assert_eq!(err, PayloadError::MissingId { entity_type: EntityType::Recipe });
    }

    #[test]
    fn test_synced_record_stamps_last_synced() {
        let record = DomainRecord::new(recipe("r1"), SyncStatus::Synced);
        assert!(record.last_synced_at.is_some());
        assert_eq!(record.id(), "r1");
        assert_eq!(record.entity_type(), EntityType::Recipe);
    }

    #[test]
    fn test_pending_record_has_no_last_synced() {
        let record = DomainRecord::new(recipe("r2"), SyncStatus::Pending);
        assert!(record.last_synced_at.is_none());
        assert!(record.is_pending());
    }

    #[test]
    fn test_payload_serializes_tagged() {
        let json_str = serde_json::to_string(&recipe("r3")).unwrap();
        assert!(json_str.contains("\"type\":\"recipe\""));
        let back: EntityPayload = serde_json::from_str(&json_str).unwrap();
        assert_eq!(back.id(), "r3");
    }

    #[test]
    fn test_domain_signals() {
        let signals = DomainSignals::from_data(&json!({"id": "a", "isFavorite": true, "timesOrdered": 12}));
        assert!(signals.favorite);
        assert_eq!(signals.times_ordered, 12);

        let none = DomainSignals::from_data(&json!({"id": "b"}));
        assert_eq!(none, DomainSignals::default());
    }

    #[test]
    fn test_size_bytes_cached() {
        let record = DomainRecord::new(recipe("r4"), SyncStatus::Synced);
        assert_eq!(record.size_bytes(), record.size_bytes());
        assert!(record.size_bytes() > std::mem::size_of::<DomainRecord>());
    }
}
