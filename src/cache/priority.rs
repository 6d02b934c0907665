// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Keep-priority scoring for cache entries.
//!
//! ```text
//! priority = 0.40 * recency      exp(-idle / half_life)
//!          + 0.35 * frequency    ln(1 + n) / ln(1 + max),  n = accesses + times ordered
//!          + 0.25 * favorite     1 if favorited
//! ```
//!
//! Pinned entries score 1.0. The result is clamped to `[0, 1]`.

use super::entry::CacheEntry;
use crate::record::SyncStatus;

#[derive(Debug, Clone, Copy)]
pub struct PriorityWeights {
    pub recency: f64,
    pub frequency: f64,
    pub favorite: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            recency: 0.4,
            frequency: 0.35,
            favorite: 0.25,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PriorityPolicy {
    /// Decay constant for recency (seconds)
    pub recency_half_life: f64,
    /// Access count that saturates the frequency term
    pub max_access_count: u64,
    pub weights: PriorityWeights,
    /// Synced copies older than this are stale (millis)
    pub stale_after_ms: i64,
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self {
            recency_half_life: 24.0 * 3600.0, // 1 day
            max_access_count: 100,
            weights: PriorityWeights::default(),
            stale_after_ms: 7 * 24 * 60 * 60 * 1000,
        }
    }
}

impl PriorityPolicy {
    #[must_use]
    pub fn with_stale_after(mut self, stale_after_ms: i64) -> Self {
        self.stale_after_ms = stale_after_ms;
        self
    }

    /// Keep-score in `[0, 1]`; 0.0 = evict first.
    #[must_use]
    pub fn score(&self, entry: &CacheEntry, now: i64) -> f64 {
        if entry.pinned {
            return 1.0;
        }

        let recency = (-entry.idle_secs(now) / self.recency_half_life).exp();

        let uses = entry.access_count.saturating_add(entry.signals.times_ordered);
        let frequency = if uses == 0 || self.max_access_count == 0 {
            0.0
        } else {
            let count = uses.min(self.max_access_count) as f64;
            (1.0 + count).ln() / (1.0 + self.max_access_count as f64).ln()
        };

        let favorite = if entry.signals.favorite { 1.0 } else { 0.0 };

        let score = recency * self.weights.recency
            + frequency * self.weights.frequency
            + favorite * self.weights.favorite;

        if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 }
    }

    #[must_use]
    pub fn is_stale(&self, entry: &CacheEntry, now: i64) -> bool {
        entry.sync_status == SyncStatus::Synced
            && entry.last_synced_at.is_some_and(|t| now - t > self.stale_after_ms)
    }

    /// Recompute priority and staleness in place.
    pub fn refresh(&self, entry: &mut CacheEntry, now: i64) {
        entry.priority = self.score(entry, now);
        entry.is_stale = self.is_stale(entry, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CacheKey;
    use crate::record::{DomainSignals, EntityType};

    const NOW: i64 = 1_700_000_000_000;

    fn make_entry(idle_secs: i64, access_count: u64, favorite: bool) -> CacheEntry {
        CacheEntry {
            key: CacheKey::new(EntityType::Recipe, "r"),
            priority: 0.0,
            access_count,
            last_accessed: NOW - idle_secs * 1000,
            is_stale: false,
            compression_ratio: 1.0,
            estimated_ratio: None,
            size_bytes: 512,
            sync_status: SyncStatus::Synced,
            last_synced_at: Some(NOW),
            signals: DomainSignals { favorite, times_ordered: 0 },
            pinned: false,
            created_at: NOW,
        }
    }

    #[test]
    fn test_recent_beats_idle() {
        let policy = PriorityPolicy::default();
        let recent = make_entry(10, 5, false);
        let idle = make_entry(30 * 24 * 3600, 5, false);
        assert!(policy.score(&recent, NOW) > policy.score(&idle, NOW));
    }

    #[test]
    fn test_frequent_beats_rare() {
        let policy = PriorityPolicy::default();
        let frequent = make_entry(3600, 80, false);
        let rare = make_entry(3600, 1, false);
        assert!(policy.score(&frequent, NOW) > policy.score(&rare, NOW));
    }

    #[test]
    fn test_favorite_biases_high() {
        let policy = PriorityPolicy::default();
        let fav = make_entry(60, 3, true);
        assert!(policy.score(&fav, NOW) > 0.6);
    }

    #[test]
    fn test_times_ordered_counts_as_frequency() {
        let policy = PriorityPolicy::default();
        let plain = make_entry(3600, 0, false);
        let mut popular = plain.clone();
        popular.signals.times_ordered = 50;
        assert!(policy.score(&popular, NOW) > policy.score(&plain, NOW));
    }

    #[test]
    fn test_pinned_is_max() {
        let policy = PriorityPolicy::default();
        let mut entry = make_entry(365 * 24 * 3600, 0, false);
        entry.pinned = true;
        assert_eq!(policy.score(&entry, NOW), 1.0);
    }

    #[test]
    fn test_score_bounds_at_extremes() {
        let policy = PriorityPolicy::default();
        let maxed = make_entry(0, u64::MAX, true);
        let s = policy.score(&maxed, NOW);
        assert!((0.0..=1.0).contains(&s));

        // Accessed "in the future" (clock skew) is treated as idle 0
        let future = make_entry(-3600, 0, false);
        assert!(policy.score(&future, NOW) <= 1.0);
    }

    #[test]
    fn test_staleness_only_for_synced() {
        let policy = PriorityPolicy::default().with_stale_after(1_000);
        let mut entry = make_entry(0, 0, false);
        entry.last_synced_at = Some(NOW - 5_000);
        assert!(policy.is_stale(&entry, NOW));

        entry.sync_status = SyncStatus::Pending;
        assert!(!policy.is_stale(&entry, NOW));

        entry.sync_status = SyncStatus::Synced;
        entry.last_synced_at = Some(NOW - 500);
        assert!(!policy.is_stale(&entry, NOW));
    }

    #[test]
    fn test_refresh_writes_fields() {
        let policy = PriorityPolicy::default().with_stale_after(1);
        let mut entry = make_entry(10, 2, false);
        entry.last_synced_at = Some(NOW - 10);
        policy.refresh(&mut entry, NOW);
        assert!(entry.priority > 0.0);
        assert!(entry.is_stale);
    }
}
