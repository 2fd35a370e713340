//! Durable tier - per-shard key-value store of frozen accumulators
//!
//! One SQLite database per shard, keyed by the bucket key's three parts so
//! range scans stay B-tree walks instead of string-prefix tricks:
//!
//! ```text
//! buckets(series TEXT, resolution TEXT, bucket INTEGER, value BLOB,
//!         PRIMARY KEY (series, resolution, bucket))
//! ```
//!
//! Writes are idempotent overwrites (INSERT OR REPLACE); there is no delete
//! path here, compaction is a separate archival pass.

use crate::rollup::{unquantize, AggregateKind, BucketKey, Resolution, StatAccumulator};
use crate::store::error::StoreResult;
use crate::store::tiered::{BucketReader, PointSeries};
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Per-shard durable key-value store
///
/// The connection sits behind a std Mutex because SQLite connections are
/// not Sync; critical sections are single statements.
pub struct DurableTier {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl DurableTier {
    /// Create or open the store at `path`
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS buckets (
                series TEXT NOT NULL,
                resolution TEXT NOT NULL,
                bucket INTEGER NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (series, resolution, bucket)
            )",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store serialized accumulator bytes under a bucket key (last-write-wins)
    pub fn put(&self, key: &BucketKey, bytes: &[u8]) -> StoreResult<()> {
        let conn = self.conn.lock().expect("durable tier lock poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO buckets (series, resolution, bucket, value)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                key.series,
                key.resolution.code().to_string(),
                key.bucket,
                bytes
            ],
        )?;
        Ok(())
    }

    /// Fetch the raw bytes for an exact bucket key
    pub fn get(&self, key: &BucketKey) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.conn.lock().expect("durable tier lock poisoned");
        let mut stmt = conn.prepare_cached(
            "SELECT value FROM buckets WHERE series = ?1 AND resolution = ?2 AND bucket = ?3",
        )?;

        let mut rows = stmt.query(params![
            key.series,
            key.resolution.code().to_string(),
            key.bucket
        ])?;

        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Sorted `(bucket, bytes)` pairs for buckets in `[from_bucket, to_bucket]`
    pub fn scan_buckets(
        &self,
        series: &str,
        resolution: Resolution,
        from_bucket: i64,
        to_bucket: i64,
    ) -> StoreResult<Vec<(i64, Vec<u8>)>> {
        let conn = self.conn.lock().expect("durable tier lock poisoned");
        let mut stmt = conn.prepare_cached(
            "SELECT bucket, value FROM buckets
             WHERE series = ?1 AND resolution = ?2 AND bucket BETWEEN ?3 AND ?4
             ORDER BY bucket",
        )?;

        let rows = stmt.query_map(
            params![series, resolution.code().to_string(), from_bucket, to_bucket],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Count populated buckets in `[from_bucket, to_bucket]`
    pub fn count_in(
        &self,
        series: &str,
        resolution: Resolution,
        from_bucket: i64,
        to_bucket: i64,
    ) -> StoreResult<u64> {
        let conn = self.conn.lock().expect("durable tier lock poisoned");
        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(*) FROM buckets
             WHERE series = ?1 AND resolution = ?2 AND bucket BETWEEN ?3 AND ?4",
        )?;

        let count: i64 = stmt.query_row(
            params![series, resolution.code().to_string(), from_bucket, to_bucket],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Distinct series names with the given prefix (used by the hourly
    /// checkpoint job to enumerate a tenant's metric paths)
    pub fn list_series(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().expect("durable tier lock poisoned");
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT series FROM buckets WHERE series LIKE ?1 ORDER BY series",
        )?;

        let rows = stmt.query_map(params![format!("{}%", prefix)], |row| {
            row.get::<_, String>(0)
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Distinct tenants present in this shard (series prefix before `/`)
    pub fn list_tenants(&self) -> StoreResult<Vec<String>> {
        let all = self.list_series("")?;
        let mut tenants: Vec<String> = all
            .iter()
            .filter_map(|s| s.split_once('/').map(|(t, _)| t.to_string()))
            .collect();
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }
}

/// Exact-key reader over a single shard's durable tier
///
/// Implements the common read contract without fallback; a miss is
/// `Ok(None)`/empty, a failed query is an error.
pub struct DurableTierReader {
    tier: Arc<DurableTier>,
}

impl DurableTierReader {
    pub fn new(tier: Arc<DurableTier>) -> Self {
        Self { tier }
    }
}

impl BucketReader for DurableTierReader {
    fn read_bucket(
        &self,
        series: &str,
        resolution: Resolution,
        ts_ms: i64,
    ) -> StoreResult<Option<StatAccumulator>> {
        let key = BucketKey::for_timestamp(series, ts_ms, resolution);
        match self.tier.get(&key)? {
            Some(bytes) => Ok(Some(StatAccumulator::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_aggregated(
        &self,
        series: &str,
        resolution: Resolution,
        kind: AggregateKind,
        from_ms: i64,
        to_ms: i64,
    ) -> StoreResult<PointSeries> {
        let raw = self.scan_raw(series, resolution, from_ms, to_ms)?;
        Ok(raw
            .into_iter()
            .map(|(ts, acc)| (ts, acc.aggregate(kind)))
            .collect())
    }

    fn scan_raw(
        &self,
        series: &str,
        resolution: Resolution,
        from_ms: i64,
        to_ms: i64,
    ) -> StoreResult<Vec<(i64, StatAccumulator)>> {
        let from_bucket = crate::rollup::quantize(from_ms, resolution);
        let to_bucket = crate::rollup::quantize(to_ms, resolution);

        let rows = self
            .tier
            .scan_buckets(series, resolution, from_bucket, to_bucket)?;

        let mut out = Vec::with_capacity(rows.len());
        for (bucket, bytes) in rows {
            let acc = StatAccumulator::deserialize(&bytes)?;
            out.push((unquantize(bucket, resolution), acc));
        }
        Ok(out)
    }

    fn count_buckets(
        &self,
        series: &str,
        resolution: Resolution,
        from_ms: i64,
        to_ms: i64,
    ) -> StoreResult<u64> {
        let from_bucket = crate::rollup::quantize(from_ms, resolution);
        let to_bucket = crate::rollup::quantize(to_ms, resolution);
        self.tier
            .count_in(series, resolution, from_bucket, to_bucket)
    }
}
