//! Write-back channel
//!
//! Bounded FIFO carrying frozen accumulators from the hot shard store to
//! the durable tier. A request on this channel is the only remaining copy
//! of its data, so a full channel blocks the producing sweep rather than
//! dropping; the sweep only removes its own copy after the send succeeds.

use crate::rollup::{BucketKey, StatAccumulator};
use crate::store::durable::DurableTier;
use crate::store::error::{StoreError, StoreResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Per-request context threaded through the write path for tracing
#[derive(Debug, Clone)]
pub struct WriteContext {
    pub request_id: Uuid,
}

impl WriteContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
        }
    }
}

impl Default for WriteContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One frozen accumulator in flight from hot to durable tier
///
/// Ownership of the accumulator transfers to the consumer at creation;
/// the hot store drops its own copy once the send succeeds.
#[derive(Debug)]
pub struct WriteBackRequest {
    pub ctx: WriteContext,
    pub shard: u32,
    pub key: BucketKey,
    pub accumulator: StatAccumulator,
}

/// Sending half of the write-back channel
pub type WriteBackSender = mpsc::Sender<WriteBackRequest>;

/// Receiving half of the write-back channel
pub type WriteBackReceiver = mpsc::Receiver<WriteBackRequest>;

/// Create a bounded write-back channel
pub fn writeback_channel(capacity: usize) -> (WriteBackSender, WriteBackReceiver) {
    mpsc::channel(capacity)
}

/// Reference write-back consumer: drains the channel and persists each
/// request's accumulator bytes into its shard's durable tier.
///
/// Persistence is an idempotent overwrite (last-write-wins), so redelivery
/// after a crash is safe.
pub struct WriteBackConsumer {
    tiers: HashMap<u32, Arc<DurableTier>>,
}

impl WriteBackConsumer {
    pub fn new(tiers: HashMap<u32, Arc<DurableTier>>) -> Self {
        Self { tiers }
    }

    /// Drain the channel until all senders are dropped
    pub async fn run(&self, mut rx: WriteBackReceiver) -> StoreResult<()> {
        while let Some(request) = rx.recv().await {
            self.persist(&request)?;
        }
        tracing::info!("Write-back channel drained, consumer exiting");
        Ok(())
    }

    /// Persist a single request
    pub fn persist(&self, request: &WriteBackRequest) -> StoreResult<()> {
        let tier = self.tiers.get(&request.shard).ok_or_else(|| {
            StoreError::Durable(format!("No durable tier for shard {}", request.shard))
        })?;

        let bytes = request.accumulator.serialize()?;
        tier.put(&request.key, &bytes)?;

        tracing::debug!(
            request_id = %request.ctx.request_id,
            shard = request.shard,
            key = %request.key.render(),
            "Persisted frozen accumulator"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::{AggregateKind, Resolution};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_consumer_persists_requests() {
        let dir = tempdir().unwrap();
        let tier = Arc::new(DurableTier::open(dir.path().join("shard_0.db")).unwrap());

        let mut tiers = HashMap::new();
        tiers.insert(0u32, tier.clone());
        let consumer = WriteBackConsumer::new(tiers);

        let (tx, rx) = writeback_channel(4);

        let mut acc = StatAccumulator::new();
        acc.update(5.0).unwrap();
        acc.update(7.0).unwrap();
        acc.freeze();

        let key = BucketKey::for_timestamp("acme/cpu", 42_000, Resolution::Secondly);
        tx.send(WriteBackRequest {
            ctx: WriteContext::new(),
            shard: 0,
            key: key.clone(),
            accumulator: acc,
        })
        .await
        .unwrap();
        drop(tx);

        consumer.run(rx).await.unwrap();

        let stored = tier.get(&key).unwrap().unwrap();
        let restored = StatAccumulator::deserialize(&stored).unwrap();
        assert_eq!(restored.aggregate(AggregateKind::Sum), 12.0);
    }

    #[tokio::test]
    async fn test_consumer_unknown_shard_is_error() {
        let consumer = WriteBackConsumer::new(HashMap::new());

        let request = WriteBackRequest {
            ctx: WriteContext::new(),
            shard: 9,
            key: BucketKey::for_timestamp("acme/cpu", 0, Resolution::Secondly),
            accumulator: StatAccumulator::new(),
        };

        assert!(consumer.persist(&request).is_err());
    }
}
