//! Compression ratio estimates for cache entries.
//!
//! The cache never stores compressed bytes itself. It only estimates how well
//! an entry would compress so budget decisions and stats can account for it.
//! With the `compression` feature the estimate is a real zstd pass over the
//! serialized payload; without it, a trigram repetition heuristic.
//!
//! Either way the ratio (compressed / original) is clamped to
//! [`MIN_RATIO`]..=1.0, and payloads below [`MIN_COMPRESSIBLE_BYTES`] report
//! exactly 1.0.

use std::collections::HashSet;
use serde::Serialize;

/// Best ratio ever reported.
pub const MIN_RATIO: f64 = 0.4;

/// Payloads smaller than this are not worth compressing.
pub const MIN_COMPRESSIBLE_BYTES: usize = 64;

/// Fast level; this is an estimate, not archival compression.
#[cfg(feature = "compression")]
const ESTIMATE_LEVEL: i32 = 1;

/// Estimate the compression ratio of `bytes`.
#[must_use]
pub fn estimate_ratio(bytes: &[u8]) -> f64 {
    if bytes.len() < MIN_COMPRESSIBLE_BYTES {
        return 1.0;
    }
    clamp_ratio(raw_ratio(bytes))
}

#[inline]
fn clamp_ratio(ratio: f64) -> f64 {
    if ratio.is_finite() {
        ratio.clamp(MIN_RATIO, 1.0)
    } else {
        1.0
    }
}

#[cfg(feature = "compression")]
fn raw_ratio(bytes: &[u8]) -> f64 {
    match zstd::bulk::compress(bytes, ESTIMATE_LEVEL) {
        Ok(compressed) => compressed.len() as f64 / bytes.len() as f64,
        Err(e) => {
            tracing::debug!(error = %e, "zstd estimate failed, using heuristic");
            heuristic_ratio(bytes)
        }
    }
}

#[cfg(not(feature = "compression"))]
fn raw_ratio(bytes: &[u8]) -> f64 {
    heuristic_ratio(bytes)
}

/// Repetition heuristic: the share of repeated trigrams, weighted by size.
/// Larger and more repetitive inputs score lower.
pub fn heuristic_ratio(bytes: &[u8]) -> f64 {
    if bytes.len() < 3 {
        return 1.0;
    }
    let total = bytes.len() - 2;
    let unique: HashSet<&[u8]> = bytes.windows(3).collect();
    let repetition = 1.0 - unique.len() as f64 / total as f64;
    let size_factor = (bytes.len() as f64 / 4096.0).min(1.0).sqrt();
    clamp_ratio(1.0 - (1.0 - MIN_RATIO) * repetition * size_factor)
}

/// Aggregate compression picture across the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CompressionStats {
    /// Bytes as stored
    pub original_bytes: usize,
    /// Bytes after the estimated ratio
    pub estimated_bytes: usize,
    /// Mean ratio over entries
    pub average_ratio: f64,
    /// Space saved as a fraction (0.0 - 1.0)
    pub savings: f64,
}

impl CompressionStats {
    /// Fold `(size_bytes, ratio)` pairs.
    pub fn from_entries(entries: impl IntoIterator<Item = (usize, f64)>) -> Self {
        let mut original = 0usize;
        let mut estimated = 0f64;
        let mut ratio_sum = 0f64;
        let mut count = 0usize;
        for (size, ratio) in entries {
            original += size;
            estimated += size as f64 * ratio;
            ratio_sum += ratio;
            count += 1;
        }
        if count == 0 {
            return Self { average_ratio: 1.0, ..Default::default() };
        }
        let savings = if original > 0 { 1.0 - estimated / original as f64 } else { 0.0 };
        Self {
            original_bytes: original,
            estimated_bytes: estimated.round() as usize,
            average_ratio: ratio_sum / count as f64,
            savings,
        }
    }
}
