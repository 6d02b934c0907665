// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the offline data layer.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `offline_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for size histograms and gauges
//!
//! # Labels
//! - `collection`: recipes, ingredients, techniques, menus, syncQueue, images, metadata
//! - `operation`: get, put, delete, scan, update_status
//! - `status`: success, error, hit, miss
//! - `outcome`: synced, retry, conflict, dropped

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a store operation
pub fn record_store_operation(collection: &str, operation: &str, status: &str) {
    counter!(
        "offline_store_operations_total",
        "collection" => collection.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record store operation latency
pub fn record_store_latency(collection: &str, operation: &str, duration: Duration) {
    histogram!(
        "offline_store_operation_seconds",
        "collection" => collection.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// The primary engine could not be opened; running on the key-value fallback
pub fn record_store_fallback() {
    counter!("offline_store_fallback_total").increment(1);
}

/// A stored row failed to decode and was skipped
pub fn record_corruption(collection: &str) {
    counter!(
        "offline_corruption_detected_total",
        "collection" => collection.to_string()
    )
    .increment(1);
}

/// Record a startup phase duration
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "offline_startup_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!(
        "offline_cache_lookups_total",
        "result" => result
    )
    .increment(1);
}

/// Set current cache index entry count
pub fn set_cache_entries(count: usize) {
    gauge!("offline_cache_entries").set(count as f64);
}

/// Set current cache index size in bytes, before compression
pub fn set_cache_bytes(bytes: usize) {
    gauge!("offline_cache_bytes").set(bytes as f64);
}

/// Record evictions from one optimization pass
pub fn record_eviction(count: usize, bytes: usize) {
    counter!("offline_evictions_total").increment(count as u64);
    counter!("offline_evicted_bytes_total").increment(bytes as u64);
}

/// One entry could not be evicted
pub fn record_eviction_failure() {
    counter!("offline_eviction_failures_total").increment(1);
}

/// Set cache pressure level (0=normal, 1=elevated, 2=critical, 3=emergency)
pub fn set_cache_pressure(level: u8) {
    gauge!("offline_cache_pressure_level").set(level as f64);
}

pub fn record_compression_ratio(ratio: f64) {
    histogram!("offline_compression_ratio").record(ratio);
}

pub fn record_optimization_duration(duration: Duration) {
    histogram!("offline_cache_optimization_seconds").record(duration.as_secs_f64());
}

/// Record one dispatched batch
pub fn record_batch(count: usize, bytes: usize) {
    histogram!("offline_sync_batch_size").record(count as f64);
    histogram!("offline_sync_batch_bytes").record(bytes as f64);
}

/// A batch was held back by admission control
pub fn record_batch_rejected(reason: &str) {
    counter!(
        "offline_sync_batches_rejected_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record the outcome of one queue item apply
pub fn record_sync_outcome(outcome: &str) {
    counter!(
        "offline_sync_items_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record remote apply latency
pub fn record_sync_latency(duration: Duration) {
    histogram!("offline_sync_apply_seconds").record(duration.as_secs_f64());
}

pub fn record_item_queued(priority: &str) {
    counter!(
        "offline_sync_items_queued_total",
        "priority" => priority.to_string()
    )
    .increment(1);
}

/// Set persisted queue depth
pub fn set_queue_depth(count: usize) {
    gauge!("offline_sync_queue_depth").set(count as f64);
}

/// Set connectivity (0=offline, 1=slow, 2=online)
pub fn set_connectivity(level: u8) {
    gauge!("offline_connectivity").set(level as f64);
}

/// A timing guard that records store latency on drop
pub struct LatencyTimer {
    collection: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(collection: &'static str, operation: &'static str) -> Self {
        Self {
            collection,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_store_latency(self.collection, self.operation, self.start.elapsed());
    }
}

/// Convenience macro for timing operations
#[macro_export]
macro_rules! time_operation {
    ($collection:expr, $op:expr) => {
        $crate::metrics::LatencyTimer::new($collection, $op)
    };
}
