use std::collections::{HashMap, VecDeque};
use serde::Serialize;

use super::entry::CacheKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessRecord {
    pub key: CacheKey,
    /// Epoch millis
    pub timestamp: i64,
}

/// Bounded ring buffer of accesses; the oldest record is dropped first.
#[derive(Debug)]
pub struct AccessHistory {
    records: VecDeque<AccessRecord>,
    cap: usize,
}

impl AccessHistory {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            records: VecDeque::with_capacity(cap.min(1024)),
            cap,
        }
    }

    pub fn push(&mut self, key: CacheKey, timestamp: i64) {
        while self.records.len() >= self.cap {
            self.records.pop_front();
        }
        self.records.push_back(AccessRecord { key, timestamp });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AccessRecord> {
        self.records.iter().cloned().collect()
    }

    /// Keys that most often came right after `key`, most frequent first.
    #[must_use]
    pub fn co_accessed(&self, key: &CacheKey, limit: usize) -> Vec<CacheKey> {
        let mut counts: HashMap<&CacheKey, usize> = HashMap::new();
        let mut iter = self.records.iter().peekable();
        while let Some(record) = iter.next() {
            if &record.key != key {
                continue;
            }
            if let Some(next) = iter.peek() {
                if &next.key != key {
                    *counts.entry(&next.key).or_default() += 1;
                }
            }
        }

        let mut ranked: Vec<(&CacheKey, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.into_iter().take(limit).map(|(k, _)| k.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EntityType;

    fn key(id: &str) -> CacheKey {
        CacheKey::new(EntityType::Recipe, id)
    }

    #[test]
    fn test_cap_drops_oldest() {
        let mut history = AccessHistory::new(3);
        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            history.push(key(id), i as i64);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.snapshot()[0].key, key("b"));
    }

    #[test]
    fn test_zero_cap_is_one() {
        let mut history = AccessHistory::new(0);
        history.push(key("a"), 0);
        history.push(key("b"), 1);
        assert_eq!(history.len(), 1);
        assert_eq!(history.cap(), 1);
    }

    #[test]
    fn test_co_accessed_ranks_followers() {
        let mut history = AccessHistory::new(100);
        let sequence = ["negroni", "campari", "negroni", "campari", "negroni", "vermouth", "gin"];
        for (i, id) in sequence.iter().enumerate() {
            history.push(key(id), i as i64);
        }

        let related = history.co_accessed(&key("negroni"), 3);
        assert_eq!(related, vec![key("campari"), key("vermouth")]);
    }

    #[test]
    fn test_clear() {
        let mut history = AccessHistory::new(10);
        history.push(key("a"), 0);
        history.clear();
        assert!(history.is_empty());
    }
}
