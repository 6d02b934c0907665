// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache pressure levels.
//!
//! Utilization (the larger of bytes-used and entries-used, as a fraction of
//! the configured limits) maps to a level. The level decides how far below
//! the low-water mark an optimization pass pushes the cache.
//!
//! # Example
//!
//! ```
//! use birch_offline::CachePressure;
//!
//! let level = CachePressure::from_utilization(0.5);
//! assert_eq!(level, CachePressure::Normal);
//! assert!(!level.should_optimize());
//!
//! let level = CachePressure::from_utilization(0.92);
//! assert_eq!(level, CachePressure::Critical);
//! assert!(level.eviction_target(0.7) < 0.7);
//! ```

/// Four-tier cascade:
/// - **Normal** (< 80%): no eviction needed
/// - **Elevated** (80-90%): evict down to the low-water mark
/// - **Critical** (90-98%): evict further below it
/// - **Emergency** (>= 98%): evict aggressively
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CachePressure {
    Normal = 0,
    Elevated = 1,
    Critical = 2,
    Emergency = 3,
}

impl CachePressure {
    /// Level from a utilization ratio (0.0 → 1.0+), using the default 0.8 trigger.
    #[must_use]
    pub fn from_utilization(utilization: f64) -> Self {
        Self::with_high_water(utilization, 0.8)
    }

    /// Level from a utilization ratio with a configurable trigger point.
    #[must_use]
    pub fn with_high_water(utilization: f64, high_water_mark: f64) -> Self {
        match utilization {
            u if u < high_water_mark => Self::Normal,
            u if u < 0.90_f64.max(high_water_mark) => Self::Elevated,
            u if u < 0.98_f64.max(high_water_mark) => Self::Critical,
            _ => Self::Emergency,
        }
    }

    #[must_use]
    pub fn should_optimize(&self) -> bool {
        !matches!(self, Self::Normal)
    }

    /// Eviction multiplier (higher pressure = more aggressive)
    #[must_use]
    pub fn eviction_multiplier(&self) -> f64 {
        match self {
            Self::Normal | Self::Elevated => 1.0,
            Self::Critical => 1.25,
            Self::Emergency => 1.5,
        }
    }

    /// Utilization an optimization pass should reach.
    #[must_use]
    pub fn eviction_target(&self, low_water_mark: f64) -> f64 {
        (low_water_mark / self.eviction_multiplier()).clamp(0.0, 1.0)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Normal operation",
            Self::Elevated => "Elevated - optimization due",
            Self::Critical => "Critical - evicting below low-water mark",
            Self::Emergency => "Emergency - aggressive eviction",
        }
    }
}

impl std::fmt::Display for CachePressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        assert_eq!(CachePressure::from_utilization(0.0), CachePressure::Normal);
        assert_eq!(CachePressure::from_utilization(0.79), CachePressure::Normal);
        assert_eq!(CachePressure::from_utilization(0.80), CachePressure::Elevated);
        assert_eq!(CachePressure::from_utilization(0.95), CachePressure::Critical);
        assert_eq!(CachePressure::from_utilization(1.5), CachePressure::Emergency);
    }

    #[test]
    fn test_custom_high_water() {
        assert_eq!(CachePressure::with_high_water(0.85, 0.9), CachePressure::Normal);
        assert_eq!(CachePressure::with_high_water(0.5, 0.5), CachePressure::Elevated);
    }

    #[test]
    fn test_targets_shrink_with_pressure() {
        let low = 0.7;
        let elevated = CachePressure::Elevated.eviction_target(low);
        let critical = CachePressure::Critical.eviction_target(low);
        let emergency = CachePressure::Emergency.eviction_target(low);
        assert_eq!(elevated, low);
        assert!(critical < elevated);
        assert!(emergency < critical);
    }

    #[test]
    fn test_ordering() {
        assert!(CachePressure::Normal < CachePressure::Elevated);
        assert!(CachePressure::Critical < CachePressure::Emergency);
    }
}
