//! Query algebra
//!
//! Pure streaming operators over the sparse, sorted `(timestamp, value)`
//! sequences produced by range scans:
//!
//! - [`scale`](algebra::scale), [`sum`](algebra::sum),
//!   [`transform`](algebra::transform)
//! - [`moving_average`](algebra::moving_average),
//!   [`moving_sum`](algebra::moving_sum),
//!   [`aggregate_sum`](algebra::aggregate_sum)
//! - [`first_derivative`](algebra::first_derivative)
//!
//! Counting is not done here: use the reader contract's own
//! [`count_buckets`](crate::store::BucketReader::count_buckets).

pub mod algebra;
pub mod error;

pub use algebra::{
    aggregate_sum, count, first_derivative, moving_average, moving_sum, moving_window, scale,
    sum, transform, TransformFn,
};
pub use error::{QueryError, QueryResult};
