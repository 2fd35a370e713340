//! Store error types
//!
//! Defines all errors that can occur across the hot and durable tiers.
//! A durable-tier read failure is deliberately distinct from a miss: the
//! tiered fallback must never mistake an error for an empty result.

use thiserror::Error;

/// Errors that can occur in the hot or durable store
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bucket key or accumulator error
    #[error("Rollup error: {0}")]
    Rollup(#[from] crate::rollup::RollupError),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Durable tier query failed (not a miss)
    #[error("Durable tier error: {0}")]
    Durable(String),

    /// Write-back channel closed while a frozen accumulator was in flight
    #[error("Write-back channel closed")]
    ChannelClosed,

    /// Snapshot stream did not match the expected framing
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Durable(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
