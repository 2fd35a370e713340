//! Checkpoint error types

use thiserror::Error;

/// Errors from writing, reading or uploading hourly checkpoints
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// I/O operation failed (fatal to that checkpoint attempt)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Store error while draining the durable tier
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Accumulator codec error
    #[error("Rollup error: {0}")]
    Rollup(#[from] crate::rollup::RollupError),

    /// Checkpoint file does not follow the expected layout
    #[error("Invalid checkpoint: {0}")]
    InvalidFormat(String),

    /// Requested metric path is not indexed in this checkpoint
    #[error("Path not in checkpoint: {0}")]
    PathNotFound(String),

    /// Upload collaborator failed
    #[error("Upload failed: {0}")]
    Upload(String),

    /// Watermark registry failure
    #[error("Node state error: {0}")]
    NodeState(String),
}

/// Result type alias for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;
