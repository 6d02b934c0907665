//! In-memory residency index over the persistent store.
//!
//! - [`entry`]: per-record residency metadata
//! - [`priority`]: keep-priority scoring and staleness
//! - [`strategy`]: victim ordering per eviction strategy
//! - [`compression`]: compression ratio estimates
//! - [`history`]: bounded access history
//! - [`engine`]: the [`CacheEngine`]
//! - [`tracked`]: [`TrackedStore`], the read-through decorator

pub mod entry;
pub mod priority;
pub mod strategy;
pub mod compression;
pub mod history;
pub mod engine;
pub mod tracked;

pub use engine::{CacheEngine, CacheHealth, CacheStats, OptimizationReport};
pub use entry::{CacheEntry, CacheKey};
pub use strategy::CacheStrategy;
pub use tracked::TrackedStore;
