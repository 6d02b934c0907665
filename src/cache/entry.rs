use serde::Serialize;

use crate::record::{DomainRecord, DomainSignals, EntityType, SizedItem, SyncStatus};

/// Identity of a cached record: `(entity type, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheKey {
    pub entity_type: EntityType,
    pub id: String,
}

impl CacheKey {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self { entity_type, id: id.into() }
    }

    pub fn of(record: &DomainRecord) -> Self {
        Self::new(record.entity_type(), record.id())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

/// Residency metadata for one cached record.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Keep-score in `[0, 1]`; higher stays longer
    pub priority: f64,
    pub access_count: u64,
    /// Epoch millis
    pub last_accessed: i64,
    pub is_stale: bool,
    /// Estimated compressed/original; exactly 1.0 with compression off
    pub compression_ratio: f64,
    /// Last computed estimate, kept so toggling compression back on is free
    #[serde(skip)]
    pub estimated_ratio: Option<f64>,
    pub size_bytes: usize,
    pub sync_status: SyncStatus,
    pub last_synced_at: Option<i64>,
    #[serde(skip)]
    pub signals: DomainSignals,
    pub pinned: bool,
    pub created_at: i64,
}

impl CacheEntry {
    /// Fresh entry for a record seen for the first time. Recency starts at
    /// the record's last local write.
    pub fn from_record(record: &DomainRecord) -> Self {
        Self {
            key: CacheKey::of(record),
            priority: 0.0,
            access_count: 0,
            last_accessed: record.local_modified_at,
            is_stale: false,
            compression_ratio: 1.0,
            estimated_ratio: None,
            size_bytes: record.size_bytes(),
            sync_status: record.sync_status,
            last_synced_at: record.last_synced_at,
            signals: record.signals(),
            pinned: false,
            created_at: record.local_modified_at,
        }
    }

    /// Refresh the record-derived fields, keeping access stats and pinning.
    pub fn refresh_from(&mut self, record: &DomainRecord) {
        self.size_bytes = record.size_bytes();
        self.sync_status = record.sync_status;
        self.last_synced_at = record.last_synced_at;
        self.signals = record.signals();
        self.estimated_ratio = None;
    }

    pub fn record_access(&mut self, now: i64) {
        self.last_accessed = self.last_accessed.max(now);
        self.access_count = self.access_count.saturating_add(1);
    }

    #[must_use]
    pub fn idle_secs(&self, now: i64) -> f64 {
        (now - self.last_accessed).max(0) as f64 / 1000.0
    }

    /// Only synced, unpinned entries may be evicted.
    #[must_use]
    pub fn is_evictable(&self) -> bool {
        self.sync_status == SyncStatus::Synced && !self.pinned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EntityPayload;
    use serde_json::json;

    fn record(status: SyncStatus) -> DomainRecord {
        let payload = EntityPayload::from_json(
            EntityType::Recipe,
            json!({"id": "gimlet", "isFavorite": true, "timesOrdered": 4}),
        ).unwrap();
        DomainRecord::new(payload, status)
    }

    #[test]
    fn test_key_display() {
        assert_eq!(CacheKey::new(EntityType::Menu, "summer").to_string(), "menu:summer");
    }

    #[test]
    fn test_from_record() {
        let entry = CacheEntry::from_record(&record(SyncStatus::Synced));
        assert_eq!(entry.key, CacheKey::new(EntityType::Recipe, "gimlet"));
        assert_eq!(entry.access_count, 0);
        assert_eq!(entry.compression_ratio, 1.0);
        assert!(entry.signals.favorite);
        assert_eq!(entry.signals.times_ordered, 4);
        assert!(entry.is_evictable());
    }

    #[test]
    fn test_pending_and_pinned_not_evictable() {
        let pending = CacheEntry::from_record(&record(SyncStatus::Pending));
        assert!(!pending.is_evictable());

        let mut pinned = CacheEntry::from_record(&record(SyncStatus::Synced));
        pinned.pinned = true;
        assert!(!pinned.is_evictable());
    }

    #[test]
    fn test_record_access_never_goes_backwards() {
        let mut entry = CacheEntry::from_record(&record(SyncStatus::Synced));
        entry.record_access(entry.last_accessed + 5_000);
        let after = entry.last_accessed;
        entry.record_access(0);
        assert_eq!(entry.last_accessed, after);
        assert_eq!(entry.access_count, 2);
    }

    #[test]
    fn test_refresh_keeps_access_stats() {
        let mut entry = CacheEntry::from_record(&record(SyncStatus::Pending));
        entry.record_access(entry.last_accessed + 1);
        entry.pinned = true;

        entry.refresh_from(&record(SyncStatus::Synced));
        assert_eq!(entry.sync_status, SyncStatus::Synced);
        assert_eq!(entry.access_count, 1);
        assert!(entry.pinned);
    }
}
