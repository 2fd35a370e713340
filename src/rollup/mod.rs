//! Rollup primitives
//!
//! The building blocks every other layer is keyed on:
//!
//! - **key**: resolution quantization and the bucket key scheme
//! - **accum**: the freezable statistics accumulator
//! - **error**: error types

pub mod accum;
pub mod error;
pub mod key;

pub use accum::{AggregateKind, StatAccumulator};
pub use error::{RollupError, RollupResult};
pub use key::{metric_path_of, quantize, unquantize, BucketKey, Resolution};
