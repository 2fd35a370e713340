//! Hot shard store
//!
//! Per-shard in-memory map of open accumulators with age tracking and a
//! freeze-and-ship sweep into the write-back channel.
//!
//! ```text
//! Write Path:
//!   write(series, ts, v) → 3 bucket keys (s/m/h) → update open accumulator
//!                          frozen race → retry (≤3) → drop + warn
//!
//! Sweep Path:
//!   freeze_and_ship(now, window) → freeze expired → send on channel → remove
//! ```
//!
//! Both the accumulator map and the creation-time map live under one
//! RwLock'd struct, so a key is present in one iff it is present in the
//! other. Freeze/update races resolve at the per-slot mutex: an update
//! either lands before the freeze or fails with the frozen error and is
//! retried against a freshly created accumulator.

use crate::rollup::{BucketKey, Resolution, RollupError, StatAccumulator};
use crate::store::error::{StoreError, StoreResult};
use crate::store::writeback::{WriteBackRequest, WriteBackSender, WriteContext};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// Attempts per bucket before a racing write is dropped
const WRITE_RETRY_BUDGET: usize = 3;

/// Start marker of the in-process snapshot stream
const SNAPSHOT_START: &str = "terrace.snapshot.begin";
/// End marker of the in-process snapshot stream
const SNAPSHOT_END: &str = "terrace.snapshot.end";

type Slot = Arc<Mutex<StatAccumulator>>;

/// The two parallel mappings, guarded together
#[derive(Default)]
struct ShardSlots {
    accumulators: HashMap<BucketKey, Slot>,
    created_at: HashMap<BucketKey, i64>,
}

/// Per-shard concurrent accumulator store
///
/// The shard owns exclusive write authority over its keys; arbitrarily many
/// writers may run concurrently with one periodic sweep.
pub struct HotShardStore {
    shard: u32,
    slots: RwLock<ShardSlots>,
    writeback: WriteBackSender,
    /// Bucket updates lost to the retry-then-drop policy (observable only here)
    dropped_updates: AtomicU64,
    /// Stops the periodic sweep task
    shutdown: RwLock<bool>,
}

impl HotShardStore {
    pub fn new(shard: u32, writeback: WriteBackSender) -> Self {
        Self {
            shard,
            slots: RwLock::new(ShardSlots::default()),
            writeback,
            dropped_updates: AtomicU64::new(0),
            shutdown: RwLock::new(false),
        }
    }

    /// Spawn the periodic freeze-and-ship sweep
    ///
    /// One task per store; the fixed-period tick means the sweep is never
    /// reentrant with itself. Runs until [`shutdown`](Self::shutdown).
    pub fn start_sweep(
        self: &Arc<Self>,
        hot_window_ms: i64,
        period_ms: u64,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(period_ms));

            loop {
                ticker.tick().await;

                if *store.shutdown.read().await {
                    break;
                }

                let now_ms = Utc::now().timestamp_millis();
                if let Err(e) = store.freeze_and_ship(now_ms, hot_window_ms).await {
                    tracing::error!(shard = store.shard, "Sweep failed: {}", e);
                }
            }
        })
    }

    /// Stop the sweep task and ship everything still held
    pub async fn shutdown(&self) -> StoreResult<usize> {
        *self.shutdown.write().await = true;
        self.flush().await
    }

    pub fn shard(&self) -> u32 {
        self.shard
    }

    /// Bucket updates dropped after exhausting the retry budget
    pub fn dropped_updates(&self) -> u64 {
        self.dropped_updates.load(Ordering::Relaxed)
    }

    /// Number of currently held keys
    pub async fn len(&self) -> usize {
        self.slots.read().await.accumulators.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Fold one sample into the secondly, minutely and hourly buckets for `ts_ms`
    ///
    /// A bucket update that loses the freeze race is retried against a
    /// recreated accumulator up to the budget, then dropped for that one
    /// bucket only; the sibling resolutions are unaffected. Best-effort by
    /// design - callers needing strict delivery pair this with idempotent
    /// redelivery upstream.
    pub async fn write(&self, ctx: &WriteContext, series: &str, ts_ms: i64, value: f64) {
        self.write_at(ctx, series, ts_ms, value, Utc::now().timestamp_millis())
            .await
    }

    /// [`write`](Self::write) with an explicit creation clock, for tests and
    /// deterministic sweeps
    pub async fn write_at(
        &self,
        ctx: &WriteContext,
        series: &str,
        ts_ms: i64,
        value: f64,
        now_ms: i64,
    ) {
        for resolution in Resolution::ALL {
            let key = BucketKey::for_timestamp(series, ts_ms, resolution);
            self.update_bucket(ctx, key, value, now_ms).await;
        }
    }

    /// Element-wise [`write`](Self::write) in input order; no atomicity
    /// across elements
    pub async fn write_batch(
        &self,
        ctx: &WriteContext,
        series: &str,
        timestamps: &[i64],
        values: &[f64],
    ) {
        let now_ms = Utc::now().timestamp_millis();
        for (ts, value) in timestamps.iter().zip(values.iter()) {
            self.write_at(ctx, series, *ts, *value, now_ms).await;
        }
    }

    async fn update_bucket(&self, ctx: &WriteContext, key: BucketKey, value: f64, now_ms: i64) {
        // A slot we already lost the freeze race against; never retry it.
        let mut lost_to: Option<Slot> = None;

        for _ in 0..WRITE_RETRY_BUDGET {
            let slot = {
                let mut slots = self.slots.write().await;
                match slots.accumulators.get(&key) {
                    Some(existing)
                        if lost_to
                            .as_ref()
                            .map_or(true, |dead| !Arc::ptr_eq(existing, dead)) =>
                    {
                        existing.clone()
                    }
                    _ => {
                        // Absent, or still the frozen slot we just failed on:
                        // (re)create and record the creation time together.
                        let fresh: Slot = Arc::new(Mutex::new(StatAccumulator::new()));
                        slots.accumulators.insert(key.clone(), fresh.clone());
                        slots.created_at.insert(key.clone(), now_ms);
                        fresh
                    }
                }
            };

            let result = slot.lock().expect("slot lock poisoned").update(value);
            match result {
                Ok(()) => return,
                Err(RollupError::Frozen) => {
                    lost_to = Some(slot);
                }
                Err(e) => {
                    tracing::error!(request_id = %ctx.request_id, key = %key.render(), "Bucket update failed: {}", e);
                    return;
                }
            }
        }

        self.dropped_updates.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            request_id = %ctx.request_id,
            key = %key.render(),
            "Dropped bucket update after {} freeze races",
            WRITE_RETRY_BUDGET
        );
    }

    /// Freeze every key older than `hot_window_ms` and ship it on the
    /// write-back channel
    ///
    /// Ship-then-remove: a key leaves the maps only after its request was
    /// accepted by the channel, so a send failure never loses the only copy.
    /// A full channel blocks the sweep rather than dropping. Returns the
    /// number of shipped buckets.
    pub async fn freeze_and_ship(&self, now_ms: i64, hot_window_ms: i64) -> StoreResult<usize> {
        let expired = {
            let slots = self.slots.read().await;
            slots
                .created_at
                .iter()
                .filter(|(_, created)| now_ms - **created >= hot_window_ms)
                .filter_map(|(key, _)| {
                    slots
                        .accumulators
                        .get(key)
                        .map(|slot| (key.clone(), slot.clone()))
                })
                .collect::<Vec<_>>()
        };

        self.ship(expired).await
    }

    /// Freeze-and-ship every held key regardless of age (shutdown/handoff)
    pub async fn flush(&self) -> StoreResult<usize> {
        let all = {
            let slots = self.slots.read().await;
            slots
                .accumulators
                .iter()
                .map(|(key, slot)| (key.clone(), slot.clone()))
                .collect::<Vec<_>>()
        };

        self.ship(all).await
    }

    async fn ship(&self, targets: Vec<(BucketKey, Slot)>) -> StoreResult<usize> {
        let mut shipped = 0;

        for (key, slot) in targets {
            let frozen = {
                let mut acc = slot.lock().expect("slot lock poisoned");
                acc.freeze();
                acc.clone()
            };

            let request = WriteBackRequest {
                ctx: WriteContext::new(),
                shard: self.shard,
                key: key.clone(),
                accumulator: frozen,
            };

            // Send failure leaves the key in place and surfaces to the caller.
            self.writeback
                .send(request)
                .await
                .map_err(|_| StoreError::ChannelClosed)?;

            let mut slots = self.slots.write().await;
            // A racing writer may have replaced the slot after losing the
            // freeze race; only remove the pair we actually shipped.
            let still_ours = slots
                .accumulators
                .get(&key)
                .map_or(false, |current| Arc::ptr_eq(current, &slot));
            if still_ours {
                slots.accumulators.remove(&key);
                slots.created_at.remove(&key);
            }
            shipped += 1;
        }

        if shipped > 0 {
            tracing::debug!(shard = self.shard, shipped, "Shipped frozen buckets");
        }

        Ok(shipped)
    }

    /// Write a point-in-time snapshot of all held (key, accumulator) pairs
    ///
    /// Framing: length-prefixed start marker, u32 count, repeated
    /// (length-prefixed key, length-prefixed accumulator bytes),
    /// length-prefixed end marker. Same-process warm restart only; no
    /// cross-version compatibility promise.
    pub async fn checkpoint<W: Write>(&self, sink: &mut W) -> StoreResult<()> {
        // Snapshot before writing the count so count matches records even
        // if the maps change mid-iteration.
        let entries = {
            let slots = self.slots.read().await;
            let mut entries = Vec::with_capacity(slots.accumulators.len());
            for (key, slot) in &slots.accumulators {
                let bytes = slot.lock().expect("slot lock poisoned").serialize()?;
                entries.push((key.render(), bytes));
            }
            entries
        };

        write_prefixed(sink, SNAPSHOT_START.as_bytes())?;
        sink.write_all(&(entries.len() as u32).to_le_bytes())?;
        for (key, bytes) in &entries {
            write_prefixed(sink, key.as_bytes())?;
            write_prefixed(sink, bytes)?;
        }
        write_prefixed(sink, SNAPSHOT_END.as_bytes())?;
        sink.flush()?;

        tracing::info!(shard = self.shard, entries = entries.len(), "Wrote hot snapshot");
        Ok(())
    }

    /// Load a snapshot produced by [`checkpoint`](Self::checkpoint),
    /// repopulating the maps; creation times restart at `now_ms`
    pub async fn restore<R: Read>(&self, source: &mut R, now_ms: i64) -> StoreResult<usize> {
        let start = read_prefixed(source)?;
        if start != SNAPSHOT_START.as_bytes() {
            return Err(StoreError::InvalidSnapshot("Missing start marker".into()));
        }

        let mut count_buf = [0u8; 4];
        source.read_exact(&mut count_buf)?;
        let count = u32::from_le_bytes(count_buf) as usize;

        let mut restored = Vec::with_capacity(count);
        for _ in 0..count {
            let key_bytes = read_prefixed(source)?;
            let key_str = String::from_utf8(key_bytes)
                .map_err(|e| StoreError::InvalidSnapshot(format!("Bad key encoding: {}", e)))?;
            let key = BucketKey::parse(&key_str)?;
            let acc = StatAccumulator::deserialize(&read_prefixed(source)?)?;
            restored.push((key, acc));
        }

        let end = read_prefixed(source)?;
        if end != SNAPSHOT_END.as_bytes() {
            return Err(StoreError::InvalidSnapshot("Missing end marker".into()));
        }

        let mut slots = self.slots.write().await;
        for (key, acc) in restored {
            slots
                .accumulators
                .insert(key.clone(), Arc::new(Mutex::new(acc)));
            slots.created_at.insert(key, now_ms);
        }

        tracing::info!(shard = self.shard, entries = count, "Restored hot snapshot");
        Ok(count)
    }

    /// Distinct metric paths currently represented among held keys
    pub async fn list_metric_paths(&self) -> Vec<String> {
        let slots = self.slots.read().await;
        let paths: BTreeSet<String> = slots
            .accumulators
            .keys()
            .map(|key| key.series.clone())
            .collect();
        paths.into_iter().collect()
    }

    /// Test/diagnostic hook: the maps must always hold the same key set
    #[doc(hidden)]
    pub async fn maps_in_sync(&self) -> bool {
        let slots = self.slots.read().await;
        slots.accumulators.len() == slots.created_at.len()
            && slots
                .accumulators
                .keys()
                .all(|k| slots.created_at.contains_key(k))
    }
}

fn write_prefixed<W: Write>(sink: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    sink.write_all(&(bytes.len() as u32).to_le_bytes())?;
    sink.write_all(bytes)
}

fn read_prefixed<R: Read>(source: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    source.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut bytes = vec![0u8; len];
    source.read_exact(&mut bytes)?;
    Ok(bytes)
}
