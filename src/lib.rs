//! # Terrace
//!
//! Multi-tenant metrics time-series store: per-second samples roll up into
//! secondly/minutely/hourly accumulators in a hot in-memory tier, get
//! frozen and shipped into a durable per-shard key-value tier, and are
//! archived hourly into self-indexing checkpoint files.
//!
//! ## Features
//!
//! - **Tiered storage**: hot accumulator maps with freeze-and-ship eviction
//! - **Strict ownership transfer**: frozen accumulators travel exactly once
//!   over a bounded write-back channel
//! - **Tiered reads**: first-match fallback across ordered readers
//! - **Hourly checkpoints**: footer-indexed binary archives per tenant-hour
//! - **Query algebra**: merge, scale, sliding windows, derivatives over
//!   sparse scan results
//!
//! ## Modules
//!
//! - [`rollup`]: bucket key scheme and the freezable accumulator
//! - [`store`]: hot shard store, write-back channel, durable tier, readers
//! - [`checkpoint`]: hourly checkpoint codec and upload orchestration
//! - [`query`]: streaming query algebra
//! - [`config`]: TOML configuration and logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use terrace::store::{writeback_channel, HotShardStore, WriteContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (tx, _rx) = writeback_channel(1024);
//!     let store = Arc::new(HotShardStore::new(0, tx));
//!
//!     // Ingest samples; each fans out to secondly/minutely/hourly buckets
//!     let ctx = WriteContext::new();
//!     store.write(&ctx, "acme/cpu.load", 1_700_000_000_000, 0.75).await;
//!
//!     // Periodic sweep freezes aged buckets and ships them downstream
//!     let sweep = store.start_sweep(120_000, 10_000);
//!
//!     // Clean shutdown ships everything still held
//!     store.shutdown().await?;
//!     sweep.await?;
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod query;
pub mod rollup;
pub mod store;

// Re-export top-level types for convenience
pub use rollup::{
    metric_path_of, quantize, unquantize, AggregateKind, BucketKey, Resolution, RollupError,
    StatAccumulator,
};

pub use store::{
    writeback_channel, BucketReader, DurableTier, DurableTierReader, HotShardStore, PointSeries,
    StoreError, StoreResult, TieredFallbackReader, WriteBackConsumer, WriteBackRequest,
    WriteContext,
};

pub use checkpoint::{
    write_checkpoint, CheckpointError, CheckpointReader, CheckpointUploader,
    FileNodeStateRegistry, LocalPathRegistry, NodeStateRegistry, PathRegistry, Uploader,
};

pub use query::{QueryError, QueryResult, TransformFn};

pub use config::{init_logging, Config, ConfigError, LoggingConfig};
