//! Bucket key scheme
//!
//! Deterministic mapping from `(series, timestamp, resolution)` to a string
//! bucket key and back:
//!
//! ```text
//! <series>:<r>:<bucket>      r ∈ {s, m, h}
//! bucket = timestamp_ms / resolution_ms   (integer division)
//! ```
//!
//! Series names may themselves carry a trailing `name:tags` segment, so
//! parsing always splits from the right. Everything here is pure.

use crate::rollup::error::{RollupError, RollupResult};
use serde::{Deserialize, Serialize};

/// Rollup granularity for a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    Secondly,
    Minutely,
    Hourly,
}

impl Resolution {
    /// All resolutions a write fans out to, finest first
    pub const ALL: [Resolution; 3] = [Resolution::Secondly, Resolution::Minutely, Resolution::Hourly];

    /// Bucket width in milliseconds
    pub fn millis(self) -> i64 {
        match self {
            Resolution::Secondly => 1_000,
            Resolution::Minutely => 60_000,
            Resolution::Hourly => 3_600_000,
        }
    }

    /// Single-character code used in rendered keys
    pub fn code(self) -> char {
        match self {
            Resolution::Secondly => 's',
            Resolution::Minutely => 'm',
            Resolution::Hourly => 'h',
        }
    }

    /// Parse a key code back into a resolution
    pub fn from_code(code: &str) -> RollupResult<Self> {
        match code {
            "s" => Ok(Resolution::Secondly),
            "m" => Ok(Resolution::Minutely),
            "h" => Ok(Resolution::Hourly),
            other => Err(RollupError::InvalidKey(format!(
                "Unknown resolution code: {}",
                other
            ))),
        }
    }
}

/// Quantize a millisecond timestamp into a bucket index
pub fn quantize(ts_ms: i64, resolution: Resolution) -> i64 {
    ts_ms / resolution.millis()
}

/// Inverse of [`quantize`]: the start timestamp of a bucket
pub fn unquantize(bucket: i64, resolution: Resolution) -> i64 {
    bucket * resolution.millis()
}

/// One `(series, resolution, time-bucket)` triple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub series: String,
    pub resolution: Resolution,
    pub bucket: i64,
}

impl BucketKey {
    /// Key for the bucket containing `ts_ms` at `resolution`
    pub fn for_timestamp(series: &str, ts_ms: i64, resolution: Resolution) -> Self {
        Self {
            series: series.to_string(),
            resolution,
            bucket: quantize(ts_ms, resolution),
        }
    }

    /// Render as `series:<r>:<bucket>`
    pub fn render(&self) -> String {
        format!("{}:{}:{}", self.series, self.resolution.code(), self.bucket)
    }

    /// Parse a rendered key, splitting from the right so colons inside the
    /// series name survive
    pub fn parse(key: &str) -> RollupResult<Self> {
        let mut parts = key.rsplitn(3, ':');
        let bucket_str = parts
            .next()
            .ok_or_else(|| RollupError::InvalidKey(key.to_string()))?;
        let code = parts
            .next()
            .ok_or_else(|| RollupError::InvalidKey(key.to_string()))?;
        let series = parts
            .next()
            .ok_or_else(|| RollupError::InvalidKey(key.to_string()))?;

        let bucket: i64 = bucket_str
            .parse()
            .map_err(|_| RollupError::InvalidKey(format!("Bad bucket index in key: {}", key)))?;
        let resolution = Resolution::from_code(code)?;

        Ok(Self {
            series: series.to_string(),
            resolution,
            bucket,
        })
    }

    /// Start timestamp of this bucket in milliseconds
    pub fn start_ms(&self) -> i64 {
        unquantize(self.bucket, self.resolution)
    }
}

/// Strip the `:<r>:<bucket>` suffix from a rendered key, recovering the
/// metric path (`name` or `name:tags`)
pub fn metric_path_of(key: &str) -> RollupResult<String> {
    Ok(BucketKey::parse(key)?.series)
}
