//! Common read contract and the tiered fallback chain
//!
//! [`BucketReader`] is the read contract shared by the durable tier and the
//! fallback chain: point lookup, aggregated and raw range scans, and a
//! populated-bucket count.
//!
//! [`TieredFallbackReader`] tries its underlying readers strictly in order
//! and returns the first non-empty result. This is a shard-migration
//! fallback, not a merge: it assumes at most one reader owns a given
//! series' data at a time. If two tiers could each hold a disjoint slice of
//! the same series (e.g. mid-rebalance) this policy under-returns; do not
//! use it there.

use crate::rollup::{AggregateKind, Resolution, StatAccumulator};
use crate::store::error::StoreResult;
use std::sync::Arc;

/// Sorted sequence of `(timestamp_ms, value)` pairs produced by scans
pub type PointSeries = Vec<(i64, f64)>;

/// Read contract over a tier of rolled-up buckets
pub trait BucketReader: Send + Sync {
    /// Accumulator for the resolution bucket containing `ts_ms`, if populated
    fn read_bucket(
        &self,
        series: &str,
        resolution: Resolution,
        ts_ms: i64,
    ) -> StoreResult<Option<StatAccumulator>>;

    /// Sorted `(bucket start, aggregate)` pairs over `[from_ms, to_ms]`
    fn scan_aggregated(
        &self,
        series: &str,
        resolution: Resolution,
        kind: AggregateKind,
        from_ms: i64,
        to_ms: i64,
    ) -> StoreResult<PointSeries>;

    /// Sorted `(bucket start, accumulator)` pairs over `[from_ms, to_ms]`
    fn scan_raw(
        &self,
        series: &str,
        resolution: Resolution,
        from_ms: i64,
        to_ms: i64,
    ) -> StoreResult<Vec<(i64, StatAccumulator)>>;

    /// Number of populated buckets in `[from_ms, to_ms]`
    fn count_buckets(
        &self,
        series: &str,
        resolution: Resolution,
        from_ms: i64,
        to_ms: i64,
    ) -> StoreResult<u64>;
}

/// First-non-empty-wins chain over ordered readers
///
/// Errors from an underlying reader propagate immediately; an error is
/// never treated as "empty, try the next tier".
pub struct TieredFallbackReader {
    readers: Vec<Arc<dyn BucketReader>>,
}

impl TieredFallbackReader {
    pub fn new(readers: Vec<Arc<dyn BucketReader>>) -> Self {
        Self { readers }
    }
}

impl BucketReader for TieredFallbackReader {
    fn read_bucket(
        &self,
        series: &str,
        resolution: Resolution,
        ts_ms: i64,
    ) -> StoreResult<Option<StatAccumulator>> {
        for reader in &self.readers {
            if let Some(acc) = reader.read_bucket(series, resolution, ts_ms)? {
                return Ok(Some(acc));
            }
        }
        Ok(None)
    }

    fn scan_aggregated(
        &self,
        series: &str,
        resolution: Resolution,
        kind: AggregateKind,
        from_ms: i64,
        to_ms: i64,
    ) -> StoreResult<PointSeries> {
        for reader in &self.readers {
            let points = reader.scan_aggregated(series, resolution, kind, from_ms, to_ms)?;
            if !points.is_empty() {
                return Ok(points);
            }
        }
        Ok(Vec::new())
    }

    fn scan_raw(
        &self,
        series: &str,
        resolution: Resolution,
        from_ms: i64,
        to_ms: i64,
    ) -> StoreResult<Vec<(i64, StatAccumulator)>> {
        for reader in &self.readers {
            let buckets = reader.scan_raw(series, resolution, from_ms, to_ms)?;
            if !buckets.is_empty() {
                return Ok(buckets);
            }
        }
        Ok(Vec::new())
    }

    fn count_buckets(
        &self,
        series: &str,
        resolution: Resolution,
        from_ms: i64,
        to_ms: i64,
    ) -> StoreResult<u64> {
        for reader in &self.readers {
            let count = reader.count_buckets(series, resolution, from_ms, to_ms)?;
            if count > 0 {
                return Ok(count);
            }
        }
        Ok(0)
    }
}
