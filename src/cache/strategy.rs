//! Victim ordering for each eviction strategy.

use std::cmp::Ordering;
use serde::{Deserialize, Serialize};

use super::entry::CacheEntry;
use super::priority::PriorityPolicy;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    /// Least recently accessed first
    Lru,
    /// Least frequently accessed first
    Lfu,
    /// Lowest stored priority first
    Priority,
    /// Largest first
    SizeBased,
    /// Stale entries first, then lowest live score
    #[default]
    Intelligent,
}

impl std::fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Lru => "lru",
            Self::Lfu => "lfu",
            Self::Priority => "priority",
            Self::SizeBased => "size-based",
            Self::Intelligent => "intelligent",
        };
        f.write_str(s)
    }
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

impl CacheStrategy {
    /// Evictable entries in eviction order (first = evict first).
    /// Pending, conflicted and pinned entries never appear.
    pub fn rank_victims<'a>(&self, entries: &'a [CacheEntry], policy: &PriorityPolicy, now: i64) -> Vec<&'a CacheEntry> {
        let mut candidates: Vec<(&CacheEntry, f64)> = entries
            .iter()
            .filter(|e| e.is_evictable())
            .map(|e| (e, self.sort_score(e, policy, now)))
            .collect();

        candidates.sort_by(|(a, sa), (b, sb)| {
            let primary = match self {
                Self::Lru => a.last_accessed.cmp(&b.last_accessed),
                Self::Lfu => a
                    .access_count
                    .cmp(&b.access_count)
                    .then_with(|| a.last_accessed.cmp(&b.last_accessed)),
                Self::SizeBased => b.size_bytes.cmp(&a.size_bytes),
                Self::Priority | Self::Intelligent => {
                    cmp_f64(*sa, *sb).then_with(|| b.size_bytes.cmp(&a.size_bytes))
                }
            };
            primary.then_with(|| a.key.cmp(&b.key))
        });

        candidates.into_iter().map(|(e, _)| e).collect()
    }

    fn sort_score(&self, entry: &CacheEntry, policy: &PriorityPolicy, now: i64) -> f64 {
        match self {
            Self::Priority => entry.priority,
            Self::Intelligent => {
                let score = policy.score(entry, now);
                // Stale copies sort below every fresh one
                if policy.is_stale(entry, now) { score - 1.0 } else { score }
            }
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CacheKey;
    use crate::record::{DomainSignals, EntityType, SyncStatus};

    const NOW: i64 = 1_700_000_000_000;

    fn entry(id: &str, last_accessed: i64, access_count: u64, size_bytes: usize) -> CacheEntry {
        CacheEntry {
            key: CacheKey::new(EntityType::Ingredient, id),
            priority: 0.5,
            access_count,
            last_accessed,
            is_stale: false,
            compression_ratio: 1.0,
            estimated_ratio: None,
            size_bytes,
            sync_status: SyncStatus::Synced,
            last_synced_at: Some(NOW),
            signals: DomainSignals::default(),
            pinned: false,
            created_at: 0,
        }
    }

    fn ids(ranked: &[&CacheEntry]) -> Vec<String> {
        ranked.iter().map(|e| e.key.id.clone()).collect()
    }

    #[test]
    fn test_lru_order() {
        let entries = vec![entry("new", NOW, 1, 10), entry("old", NOW - 10_000, 50, 10)];
        let ranked = CacheStrategy::Lru.rank_victims(&entries, &PriorityPolicy::default(), NOW);
        assert_eq!(ids(&ranked), vec!["old", "new"]);
    }

    #[test]
    fn test_lfu_order() {
        let entries = vec![entry("hot", NOW - 10_000, 50, 10), entry("cold", NOW, 1, 10)];
        let ranked = CacheStrategy::Lfu.rank_victims(&entries, &PriorityPolicy::default(), NOW);
        assert_eq!(ids(&ranked), vec!["cold", "hot"]);
    }

    #[test]
    fn test_size_based_order() {
        let entries = vec![entry("small", NOW, 1, 10), entry("big", NOW, 1, 10_000)];
        let ranked = CacheStrategy::SizeBased.rank_victims(&entries, &PriorityPolicy::default(), NOW);
        assert_eq!(ids(&ranked), vec!["big", "small"]);
    }

    #[test]
    fn test_priority_order_uses_stored_priority() {
        let mut low = entry("low", NOW, 1, 10);
        low.priority = 0.1;
        let mut high = entry("high", NOW, 1, 10);
        high.priority = 0.9;
        let entries = vec![high, low];
        let ranked = CacheStrategy::Priority.rank_victims(&entries, &PriorityPolicy::default(), NOW);
        assert_eq!(ids(&ranked), vec!["low", "high"]);
    }

    #[test]
    fn test_intelligent_puts_stale_first() {
        let policy = PriorityPolicy::default().with_stale_after(1_000);
        let mut stale = entry("stale", NOW, 90, 10);
        stale.last_synced_at = Some(NOW - 10_000);
        let fresh = entry("fresh", NOW - 100_000, 0, 10);

        let entries = vec![fresh, stale];
        let ranked = CacheStrategy::Intelligent.rank_victims(&entries, &policy, NOW);
        assert_eq!(ids(&ranked), vec!["stale", "fresh"]);
    }

    #[test]
    fn test_unevictable_entries_excluded() {
        let mut pending = entry("pending", 0, 0, 10);
        pending.sync_status = SyncStatus::Pending;
        let mut conflict = entry("conflict", 0, 0, 10);
        conflict.sync_status = SyncStatus::Conflict;
        let mut pinned = entry("pinned", 0, 0, 10);
        pinned.pinned = true;
        let ok = entry("ok", 0, 0, 10);

        let entries = vec![pending, conflict, pinned, ok];
        for strategy in [
            CacheStrategy::Lru,
            CacheStrategy::Lfu,
            CacheStrategy::Priority,
            CacheStrategy::SizeBased,
            CacheStrategy::Intelligent,
        ] {
            let ranked = strategy.rank_victims(&entries, &PriorityPolicy::default(), NOW);
            assert_eq!(ids(&ranked), vec!["ok"], "strategy {}", strategy);
        }
    }
}
