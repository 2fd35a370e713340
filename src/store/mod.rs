//! Tiered rollup store
//!
//! The write and read paths around the rollup accumulators:
//!
//! - **hot**: per-shard in-memory accumulator map with freeze-and-ship sweep
//! - **writeback**: bounded channel carrying frozen accumulators, plus the
//!   reference consumer
//! - **durable**: per-shard SQLite key-value tier of frozen accumulators
//! - **tiered**: the common read contract and the first-match fallback chain
//! - **error**: error types
//!
//! # Data Flow
//!
//! ```text
//! write() → hot accumulators → sweep freezes expired → write-back channel
//!        → consumer persists → durable tier → readers (direct or tiered)
//! ```

pub mod durable;
pub mod error;
pub mod hot;
pub mod tiered;
pub mod writeback;

pub use durable::{DurableTier, DurableTierReader};
pub use error::{StoreError, StoreResult};
pub use hot::HotShardStore;
pub use tiered::{BucketReader, PointSeries, TieredFallbackReader};
pub use writeback::{
    writeback_channel, WriteBackConsumer, WriteBackReceiver, WriteBackRequest, WriteBackSender,
    WriteContext,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::{AggregateKind, Resolution};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::tempdir;

    /// Write → flush → consume → read back: the durable aggregate matches
    /// the values routed to each bucket.
    #[tokio::test]
    async fn test_write_flush_readback_pipeline() {
        let dir = tempdir().unwrap();
        let tier = Arc::new(DurableTier::open(dir.path().join("shard_0.db")).unwrap());

        let (tx, rx) = writeback_channel(64);
        let store = HotShardStore::new(0, tx);

        let ctx = WriteContext::new();
        // Seconds 1 and 2 of minute 0; all of it lands in hour 0
        store
            .write_batch(&ctx, "acme/cpu", &[1_000, 1_500, 2_000], &[10.0, 20.0, 30.0])
            .await;

        store.flush().await.unwrap();
        drop(store);

        let mut tiers = HashMap::new();
        tiers.insert(0u32, tier.clone());
        WriteBackConsumer::new(tiers).run(rx).await.unwrap();

        let reader = DurableTierReader::new(tier);

        // Second bucket 1 got 10 and 20, bucket 2 got 30
        let points = reader
            .scan_aggregated("acme/cpu", Resolution::Secondly, AggregateKind::Sum, 0, 10_000)
            .unwrap();
        assert_eq!(points, vec![(1_000, 30.0), (2_000, 30.0)]);

        // Minute and hour buckets each saw all three values
        let minute = reader
            .read_bucket("acme/cpu", Resolution::Minutely, 1_000)
            .unwrap()
            .unwrap();
        assert_eq!(minute.aggregate(AggregateKind::Count), 3.0);
        assert_eq!(minute.aggregate(AggregateKind::Avg), 20.0);

        let hour = reader
            .read_bucket("acme/cpu", Resolution::Hourly, 1_000)
            .unwrap()
            .unwrap();
        assert_eq!(hour.aggregate(AggregateKind::Max), 30.0);
    }
}
