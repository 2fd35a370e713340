//! Statistics accumulator
//!
//! A mutable running summary for one bucket with an explicit one-way
//! OPEN → FROZEN lifecycle. While open it accepts updates; once frozen any
//! further update fails with [`RollupError::Frozen`]. Frozen is the state
//! in which accumulators are shipped to the durable tier, so the flag
//! travels with the serialized bytes.
//!
//! Percentiles are nearest-rank over the retained samples. Buckets hold at
//! most one resolution-step of data (a second, a minute, an hour of one
//! series), so retaining samples is bounded by the ingest rate per series.

use crate::rollup::error::{RollupError, RollupResult};
use serde::{Deserialize, Serialize};

/// Aggregation functions an accumulator can answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateKind {
    Avg,
    Sum,
    Min,
    Max,
    Count,
    P50,
    P75,
    P90,
    P95,
    P99,
}

impl AggregateKind {
    fn percentile_rank(self) -> Option<f64> {
        match self {
            AggregateKind::P50 => Some(0.50),
            AggregateKind::P75 => Some(0.75),
            AggregateKind::P90 => Some(0.90),
            AggregateKind::P95 => Some(0.95),
            AggregateKind::P99 => Some(0.99),
            _ => None,
        }
    }
}

/// Freezable running statistical summary for one bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatAccumulator {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    /// Retained samples for percentile queries
    samples: Vec<f64>,
    frozen: bool,
}

impl Default for StatAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatAccumulator {
    /// Create an empty, open accumulator
    pub fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            samples: Vec::new(),
            frozen: false,
        }
    }

    /// Fold one value into the summary
    ///
    /// Fails with [`RollupError::Frozen`] after [`freeze`](Self::freeze) has
    /// run; callers on the hot path treat that as a retry signal.
    pub fn update(&mut self, value: f64) -> RollupResult<()> {
        if self.frozen {
            return Err(RollupError::Frozen);
        }

        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.samples.push(value);
        Ok(())
    }

    /// Transition to FROZEN; one-way, idempotent
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Compute one aggregate over the folded values
    ///
    /// Empty accumulators answer NaN for value aggregates and 0 for count.
    pub fn aggregate(&self, kind: AggregateKind) -> f64 {
        if let Some(rank) = kind.percentile_rank() {
            return self.percentile(rank);
        }

        match kind {
            AggregateKind::Count => self.count as f64,
            AggregateKind::Sum => self.sum,
            _ if self.count == 0 => f64::NAN,
            AggregateKind::Avg => self.sum / self.count as f64,
            AggregateKind::Min => self.min,
            AggregateKind::Max => self.max,
            _ => unreachable!("percentiles handled above"),
        }
    }

    /// Nearest-rank percentile over retained samples
    fn percentile(&self, rank: f64) -> f64 {
        if self.samples.is_empty() {
            return f64::NAN;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let idx = ((rank * sorted.len() as f64).ceil() as usize).max(1) - 1;
        sorted[idx.min(sorted.len() - 1)]
    }

    /// Serialize to opaque bytes (the form stored in the durable tier and
    /// in checkpoint files)
    pub fn serialize(&self) -> RollupResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Inverse of [`serialize`](Self::serialize)
    pub fn deserialize(bytes: &[u8]) -> RollupResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
