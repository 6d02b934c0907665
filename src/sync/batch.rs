// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batch planning and admission control.
//!
//! Queue items are grouped by `(priority, network requirement)`, ordered
//! inside each group so dependent mutations go after the ones they depend
//! on, then packed into batches no larger than the network's optimal size.
//! [`should_process_batch`] decides whether a planned batch may go out on the
//! current network.
//!
//! # Example
//!
//! ```
//! use birch_offline::sync::batch::{BatchPacker, SyncBatch};
//! use birch_offline::SyncPriority;
//!
//! let mut packer: BatchPacker<&str> = BatchPacker::new(100);
//! assert!(packer.push("a", 60).is_none());
//! // "b" does not fit next to "a", so the first batch is closed
//! let closed = packer.push("b", 60).unwrap();
//! assert_eq!(closed.items, vec!["a"]);
//! ```

use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::network::NetworkCondition;
use super::queue_item::{NetworkRequirement, SyncPriority, SyncQueueItem};
use crate::record::SizedItem;

/// Fixed per-item cost added to duration estimates.
const PER_ITEM_OVERHEAD: Duration = Duration::from_millis(50);

/// Items dispatched together in one network exchange.
#[derive(Debug, Clone)]
pub struct SyncBatch {
    pub items: Vec<SyncQueueItem>,
    pub total_size: usize,
    pub priority: SyncPriority,
    pub network_requirement: NetworkRequirement,
    pub estimated_duration: Duration,
}

impl SyncBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Estimated wall time to send `total_size` bytes in `count` items.
#[must_use]
pub fn estimate_duration(total_size: usize, count: usize, network: &NetworkCondition) -> Duration {
    let transfer = Duration::from_secs_f64(total_size as f64 / network.bytes_per_second());
    transfer + PER_ITEM_OVERHEAD * count as u32
}

/// Packs items into batches bounded by a byte budget.
///
/// Closes the open batch when the next item would overflow it. An item
/// larger than the budget gets a batch to itself.
#[derive(Debug)]
pub struct BatchPacker<T> {
    max_bytes: usize,
    items: Vec<T>,
    total_bytes: usize,
}

/// A closed batch from [`BatchPacker`].
#[derive(Debug)]
pub struct PackedBatch<T> {
    pub items: Vec<T>,
    pub total_bytes: usize,
}

impl<T> BatchPacker<T> {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            items: Vec::new(),
            total_bytes: 0,
        }
    }

    /// Add an item, returning the previous batch if this item did not fit in it.
    pub fn push(&mut self, item: T, size_bytes: usize) -> Option<PackedBatch<T>> {
        let closed = if !self.items.is_empty() && self.total_bytes + size_bytes > self.max_bytes {
            self.take()
        } else {
            None
        };
        self.items.push(item);
        self.total_bytes += size_bytes;
        closed
    }

    /// Close the open batch, if any.
    pub fn take(&mut self) -> Option<PackedBatch<T>> {
        if self.items.is_empty() {
            return None;
        }
        let total_bytes = std::mem::take(&mut self.total_bytes);
        Some(PackedBatch {
            items: std::mem::take(&mut self.items),
            total_bytes,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Group, order and pack queue items for the given network.
///
/// Within a group: fewer dependencies first, then older first.
/// Across batches: higher priority first, then shorter estimated duration.
pub fn create_optimized_batches(items: Vec<SyncQueueItem>, network: &NetworkCondition) -> Vec<SyncBatch> {
    let mut groups: BTreeMap<(SyncPriority, NetworkRequirement), Vec<SyncQueueItem>> = BTreeMap::new();
    for item in items {
        groups
            .entry((item.priority, item.network_requirement))
            .or_default()
            .push(item);
    }

    let budget = network.optimal_batch_size();
    let mut batches = Vec::new();

    for ((priority, requirement), mut group) in groups {
        group.sort_by(|a, b| {
            a.dependencies
                .len()
                .cmp(&b.dependencies.len())
                .then(a.timestamp.cmp(&b.timestamp))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut packer = BatchPacker::new(budget);
        let mut closed = Vec::new();
        for item in group {
            let size = item.size_bytes();
            if let Some(batch) = packer.push(item, size) {
                closed.push(batch);
            }
        }
        closed.extend(packer.take());

        batches.extend(closed.into_iter().map(|packed| SyncBatch {
            estimated_duration: estimate_duration(packed.total_bytes, packed.items.len(), network),
            total_size: packed.total_bytes,
            items: packed.items,
            priority,
            network_requirement: requirement,
        }));
    }

    batches.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.estimated_duration.cmp(&b.estimated_duration))
    });

    debug!(batches = batches.len(), budget, "Planned sync batches");
    batches
}

/// Why a batch was held back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchRejection {
    Offline,
    NeedsWifi,
    NeedsFastNetwork,
    OverCostCap { cap: usize },
    LowPriorityOnExpensiveNetwork,
}

impl BatchRejection {
    /// Metric label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::NeedsWifi => "wifi",
            Self::NeedsFastNetwork => "fast",
            Self::OverCostCap { .. } => "cost_cap",
            Self::LowPriorityOnExpensiveNetwork => "low_priority",
        }
    }
}

impl std::fmt::Display for BatchRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline => write!(f, "offline"),
            Self::NeedsWifi => write!(f, "requires wifi"),
            Self::NeedsFastNetwork => write!(f, "requires a fast network"),
            Self::OverCostCap { cap } => write!(f, "exceeds cost cap of {} bytes", cap),
            Self::LowPriorityOnExpensiveNetwork => write!(f, "low priority on expensive network"),
        }
    }
}

/// Admission check for one batch on the current network.
pub fn check_batch(batch: &SyncBatch, network: &NetworkCondition) -> Result<(), BatchRejection> {
    use super::network::{NetworkCost, NetworkSpeed};

    if !network.online {
        return Err(BatchRejection::Offline);
    }
    if batch.network_requirement == NetworkRequirement::Wifi && !network.is_wifi() {
        return Err(BatchRejection::NeedsWifi);
    }
    if batch.network_requirement == NetworkRequirement::Fast && network.speed == NetworkSpeed::Slow {
        return Err(BatchRejection::NeedsFastNetwork);
    }
    let cap = network.cost_cap_bytes();
    if batch.total_size > cap {
        return Err(BatchRejection::OverCostCap { cap });
    }
    if batch.priority == SyncPriority::Low && network.cost == NetworkCost::Expensive {
        return Err(BatchRejection::LowPriorityOnExpensiveNetwork);
    }
    Ok(())
}

#[must_use]
pub fn should_process_batch(batch: &SyncBatch, network: &NetworkCondition) -> bool {
    check_batch(batch, network).is_ok()
}
