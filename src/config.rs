//! Configuration for the offline data layer.
//!
//! # Example
//!
//! ```
//! use birch_offline::{OfflineConfig, CacheStrategy};
//!
//! // Minimal config (uses defaults, memory fallback)
//! let config = OfflineConfig::default();
//! assert_eq!(config.cache.max_cache_size, 100 * 1024 * 1024); // 100 MB
//! assert_eq!(config.sync.max_retries, 3);
//!
//! // From JSON, as a host app would ship it
//! let config: OfflineConfig = serde_json::from_str(r#"{
//!     "database_path": "/tmp/birch.db",
//!     "cache": { "strategy": "size-based", "compression": true },
//!     "sync": { "conflict_resolution": "last-write-wins" }
//! }"#).unwrap();
//! assert_eq!(config.cache.strategy, CacheStrategy::SizeBased);
//! assert!(config.validate().is_ok());
//! ```

use serde::Deserialize;

use crate::cache::strategy::CacheStrategy;
use crate::error::ConfigurationError;
use crate::sync::queue_item::ConflictResolution;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OfflineConfig {
    /// SQLite file for the primary store. If it cannot be opened, a
    /// key-value snapshot is kept beside it. `None` keeps everything in
    /// memory, so nothing survives a restart.
    #[serde(default)]
    pub database_path: Option<String>,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

impl OfflineConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.cache.validate()?;
        self.sync.validate()
    }
}

/// Cache residency and eviction settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Byte budget for cached records (default: 100 MB)
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: usize,

    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default)]
    pub strategy: CacheStrategy,

    /// Estimate per-entry compression ratios
    #[serde(default)]
    pub compression: bool,

    /// Prefetch co-accessed items in the background
    #[serde(default)]
    pub predictive: bool,

    /// Age after which a synced copy counts as stale (default: 7 days)
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: i64,

    /// Utilization that triggers automatic optimization
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: f64,

    /// Utilization eviction aims for once triggered
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: f64,

    /// Access history ring buffer capacity
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
}

fn default_max_cache_size() -> usize { 100 * 1024 * 1024 } // 100 MB
fn default_max_entries() -> usize { 10_000 }
fn default_stale_after_ms() -> i64 { 7 * 24 * 60 * 60 * 1000 } // 7 days
fn default_high_water_mark() -> f64 { 0.8 }
fn default_low_water_mark() -> f64 { 0.7 }
fn default_history_cap() -> usize { 10_000 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: default_max_cache_size(),
            max_entries: default_max_entries(),
            strategy: CacheStrategy::default(),
            compression: false,
            predictive: false,
            stale_after_ms: default_stale_after_ms(),
            high_water_mark: default_high_water_mark(),
            low_water_mark: default_low_water_mark(),
            history_cap: default_history_cap(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_cache_size == 0 {
            return Err(ConfigurationError::invalid("cache.max_cache_size", "must be greater than zero"));
        }
        if self.max_entries == 0 {
            return Err(ConfigurationError::invalid("cache.max_entries", "must be greater than zero"));
        }
        if self.history_cap == 0 {
            return Err(ConfigurationError::invalid("cache.history_cap", "must be greater than zero"));
        }
        if self.stale_after_ms <= 0 {
            return Err(ConfigurationError::invalid("cache.stale_after_ms", "must be positive"));
        }
        if !(self.high_water_mark > 0.0 && self.high_water_mark <= 1.0) {
            return Err(ConfigurationError::invalid("cache.high_water_mark", "must be in (0, 1]"));
        }
        if !(self.low_water_mark > 0.0 && self.low_water_mark < self.high_water_mark) {
            return Err(ConfigurationError::invalid(
                "cache.low_water_mark",
                "must be positive and below high_water_mark",
            ));
        }
        Ok(())
    }
}

/// Background sync settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub enable_background_sync: bool,

    /// Fallback tick period when no network condition is known
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default)]
    pub conflict_resolution: ConflictResolution,
}

fn default_true() -> bool { true }
fn default_sync_interval_ms() -> u64 { 30_000 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 1_000 }
fn default_backoff_multiplier() -> f64 { 2.0 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enable_background_sync: true,
            sync_interval_ms: default_sync_interval_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            conflict_resolution: ConflictResolution::default(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.sync_interval_ms == 0 {
            return Err(ConfigurationError::invalid("sync.sync_interval_ms", "must be greater than zero"));
        }
        if self.max_retries == 0 {
            return Err(ConfigurationError::invalid("sync.max_retries", "must be at least 1"));
        }
        if !(self.backoff_multiplier >= 1.0 && self.backoff_multiplier.is_finite()) {
            return Err(ConfigurationError::invalid("sync.backoff_multiplier", "must be a finite value >= 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(OfflineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: OfflineConfig = serde_json::from_str("{}").unwrap();
        assert!(config.database_path.is_none());
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.cache.history_cap, 10_000);
        assert!(config.sync.enable_background_sync);
        assert_eq!(config.sync.conflict_resolution, ConflictResolution::Manual);
    }

    #[test]
    fn test_kebab_case_enums() {
        let config: OfflineConfig = serde_json::from_str(
            r#"{"cache": {"strategy": "lfu"}, "sync": {"conflict_resolution": "merge"}}"#,
        ).unwrap();
        assert_eq!(config.cache.strategy, CacheStrategy::Lfu);
        assert_eq!(config.sync.conflict_resolution, ConflictResolution::Merge);
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let result: Result<OfflineConfig, _> =
            serde_json::from_str(r#"{"cache": {"strategy": "random"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut cache = CacheConfig::default();
        cache.max_entries = 0;
        let err = cache.validate().unwrap_err();
        assert!(err.to_string().contains("max_entries"));
    }

    #[test]
    fn test_water_marks_must_be_ordered() {
        let cache = CacheConfig {
            low_water_mark: 0.9,
            high_water_mark: 0.8,
            ..Default::default()
        };
        assert!(cache.validate().is_err());
    }

    #[test]
    fn test_backoff_multiplier_below_one_rejected() {
        let sync = SyncConfig {
            backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert!(sync.validate().is_err());
    }
}
