//! Query error types

use thiserror::Error;

/// Errors that can occur during query evaluation
#[derive(Error, Debug)]
pub enum QueryError {
    /// Operation deliberately not implemented in this layer
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Storage layer error while scanning
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

/// Result type alias for query operations
pub type QueryResult<T> = Result<T, QueryError>;
