//! Rollup error types

use thiserror::Error;

/// Errors from bucket keys and accumulators
#[derive(Error, Debug)]
pub enum RollupError {
    /// Update issued against an accumulator that has been frozen
    #[error("Accumulator is frozen")]
    Frozen,

    /// A bucket key string that does not follow `series:<r>:<bucket>`
    #[error("Invalid bucket key: {0}")]
    InvalidKey(String),

    /// Accumulator serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for RollupError {
    fn from(err: bincode::Error) -> Self {
        RollupError::Serialization(err.to_string())
    }
}

/// Result type alias for rollup operations
pub type RollupResult<T> = Result<T, RollupError>;
