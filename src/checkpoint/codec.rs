//! Hourly checkpoint file format
//!
//! One file per (tenant, shard, hour), draining the shard's durable tier
//! into a self-indexing archive. Immutable once written.
//!
//! Layout (all integers little-endian):
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ For each metric path with an hourly bucket:  │
//! │   SECONDLY BLOCK                             │
//! │     count: u32                               │
//! │     count × (second_offset: u32,             │
//! │              len: u32, accumulator bytes)    │
//! │   MINUTELY BLOCK (same shape, offsets 0-59)  │
//! │   HOURLY BLOCK                               │
//! │     len: u32, accumulator bytes              │
//! ├──────────────────────────────────────────────┤
//! │ METADATA BLOCK                               │
//! │   path_count: u32                            │
//! │   per path: len: u32, name bytes,            │
//! │     secondly_start: u64, minutely_start: u64,│
//! │     hourly_start: u64, end: u64              │
//! ├──────────────────────────────────────────────┤
//! │ TRAILER: metadata_start: u64 (8 bytes)       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The trailer lets a reader seek straight to a path's blocks: read the
//! last 8 bytes, scan the metadata block, seek. The writer goes through a
//! temp path and renames after fsync, so a crashed attempt never leaves a
//! file whose trailer looks valid.

use crate::checkpoint::error::{CheckpointError, CheckpointResult};
use crate::rollup::{BucketKey, Resolution, StatAccumulator};
use crate::store::DurableTier;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Seconds per hour, the span of one checkpoint's secondly block
const SECONDS_PER_HOUR: i64 = 3_600;
const MINUTES_PER_HOUR: i64 = 60;

/// Byte offsets bounding one metric path's blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathOffsets {
    pub secondly_start: u64,
    pub minutely_start: u64,
    pub hourly_start: u64,
    pub end: u64,
}

/// Everything one checkpoint holds for a single metric path
#[derive(Debug)]
pub struct PathHourData {
    /// (second offset within hour, accumulator), sparse, sorted
    pub seconds: Vec<(u32, StatAccumulator)>,
    /// (minute offset within hour, accumulator), sparse, sorted
    pub minutes: Vec<(u32, StatAccumulator)>,
    /// The hour's rolled-up accumulator
    pub hourly: StatAccumulator,
}

/// Outcome of a successful checkpoint write
#[derive(Debug)]
pub struct CheckpointSummary {
    pub path: PathBuf,
    pub metric_paths: usize,
    pub bytes: u64,
}

/// Write the checkpoint for `(tenant, hour)` out of `tier`
///
/// `hour` is the hourly bucket index (epoch hours). Paths without an hourly
/// accumulator for the hour are skipped entirely; if no path qualifies, no
/// file is created and `None` is returned. The file is fsynced before the
/// rename, so a return of `Some` means the checkpoint is crash-durable.
pub fn write_checkpoint(
    tenant: &str,
    tier: &DurableTier,
    out_path: &Path,
    hour: i64,
) -> CheckpointResult<Option<CheckpointSummary>> {
    // Qualifying paths: those with an hourly accumulator for this hour.
    let mut qualifying = Vec::new();
    for series in tier.list_series(&format!("{}/", tenant))? {
        let hourly_key = BucketKey {
            series: series.clone(),
            resolution: Resolution::Hourly,
            bucket: hour,
        };
        if let Some(hourly_bytes) = tier.get(&hourly_key)? {
            qualifying.push((series, hourly_bytes));
        }
    }

    if qualifying.is_empty() {
        tracing::debug!(tenant, hour, "No qualifying paths, skipping checkpoint");
        return Ok(None);
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = out_path.with_extension("tmp");
    let file = File::create(&tmp_path)?;
    let mut writer = CountingWriter::new(BufWriter::new(file));

    let first_second = hour * SECONDS_PER_HOUR;
    let first_minute = hour * MINUTES_PER_HOUR;

    let mut index = Vec::with_capacity(qualifying.len());
    for (series, hourly_bytes) in &qualifying {
        let secondly_start = writer.position();
        let seconds = tier.scan_buckets(
            series,
            Resolution::Secondly,
            first_second,
            first_second + SECONDS_PER_HOUR - 1,
        )?;
        write_sparse_block(&mut writer, &seconds, first_second)?;

        let minutely_start = writer.position();
        let minutes = tier.scan_buckets(
            series,
            Resolution::Minutely,
            first_minute,
            first_minute + MINUTES_PER_HOUR - 1,
        )?;
        write_sparse_block(&mut writer, &minutes, first_minute)?;

        let hourly_start = writer.position();
        writer.write_all(&(hourly_bytes.len() as u32).to_le_bytes())?;
        writer.write_all(hourly_bytes)?;

        index.push((
            series.clone(),
            PathOffsets {
                secondly_start,
                minutely_start,
                hourly_start,
                end: writer.position(),
            },
        ));
    }

    // Metadata block, then the trailer pointing back at it. The trailer is
    // written last so a truncated file cannot pass for a complete one.
    let metadata_start = writer.position();
    writer.write_all(&(index.len() as u32).to_le_bytes())?;
    for (series, offsets) in &index {
        writer.write_all(&(series.len() as u32).to_le_bytes())?;
        writer.write_all(series.as_bytes())?;
        writer.write_all(&offsets.secondly_start.to_le_bytes())?;
        writer.write_all(&offsets.minutely_start.to_le_bytes())?;
        writer.write_all(&offsets.hourly_start.to_le_bytes())?;
        writer.write_all(&offsets.end.to_le_bytes())?;
    }
    writer.write_all(&metadata_start.to_le_bytes())?;

    let bytes = writer.position();
    let inner = writer.into_inner();
    let file = inner
        .into_inner()
        .map_err(|e| CheckpointError::Io(e.into_error()))?;
    file.sync_all()?;
    std::fs::rename(&tmp_path, out_path)?;

    tracing::info!(
        tenant,
        hour,
        metric_paths = index.len(),
        bytes,
        path = %out_path.display(),
        "Wrote hourly checkpoint"
    );

    Ok(Some(CheckpointSummary {
        path: out_path.to_path_buf(),
        metric_paths: index.len(),
        bytes,
    }))
}

/// Write one sparse block: count, then (offset-within-hour, bytes) pairs
fn write_sparse_block<W: Write>(
    writer: &mut W,
    buckets: &[(i64, Vec<u8>)],
    first_bucket: i64,
) -> CheckpointResult<()> {
    writer.write_all(&(buckets.len() as u32).to_le_bytes())?;
    for (bucket, bytes) in buckets {
        writer.write_all(&((bucket - first_bucket) as u32).to_le_bytes())?;
        writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
        writer.write_all(bytes)?;
    }
    Ok(())
}

/// Sequential writer that tracks the running byte offset, so the index can
/// be built without any seeking during the append phase
struct CountingWriter<W: Write> {
    inner: W,
    position: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.position += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Footer-indexed reader over a written checkpoint
pub struct CheckpointReader {
    reader: BufReader<File>,
    index: Vec<(String, PathOffsets)>,
}

impl CheckpointReader {
    /// Open a checkpoint, reading the trailer and metadata block
    pub fn open(path: impl AsRef<Path>) -> CheckpointResult<Self> {
        let file = File::open(path.as_ref())?;
        let file_len = file.metadata()?.len();
        if file_len < 8 {
            return Err(CheckpointError::InvalidFormat(
                "File shorter than the trailer".into(),
            ));
        }

        let mut reader = BufReader::new(file);

        reader.seek(SeekFrom::End(-8))?;
        let metadata_start = read_u64(&mut reader)?;
        if metadata_start >= file_len - 8 {
            return Err(CheckpointError::InvalidFormat(format!(
                "Metadata offset {} beyond file of {} bytes",
                metadata_start, file_len
            )));
        }

        reader.seek(SeekFrom::Start(metadata_start))?;
        let path_count = read_u32(&mut reader)? as usize;

        let mut index = Vec::with_capacity(path_count);
        for _ in 0..path_count {
            let name_len = read_u32(&mut reader)? as usize;
            let mut name = vec![0u8; name_len];
            reader.read_exact(&mut name)?;
            let name = String::from_utf8(name)
                .map_err(|e| CheckpointError::InvalidFormat(format!("Bad path name: {}", e)))?;

            index.push((
                name,
                PathOffsets {
                    secondly_start: read_u64(&mut reader)?,
                    minutely_start: read_u64(&mut reader)?,
                    hourly_start: read_u64(&mut reader)?,
                    end: read_u64(&mut reader)?,
                },
            ));
        }

        Ok(Self { reader, index })
    }

    /// Metric paths indexed in this checkpoint, in file order
    pub fn metric_paths(&self) -> Vec<&str> {
        self.index.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Offsets for one path, if indexed
    pub fn offsets_of(&self, path: &str) -> Option<PathOffsets> {
        self.index
            .iter()
            .find(|(name, _)| name == path)
            .map(|(_, offsets)| *offsets)
    }

    /// Seek-read all blocks of one metric path
    pub fn read_path(&mut self, path: &str) -> CheckpointResult<PathHourData> {
        let offsets = self
            .offsets_of(path)
            .ok_or_else(|| CheckpointError::PathNotFound(path.to_string()))?;

        self.reader.seek(SeekFrom::Start(offsets.secondly_start))?;
        let seconds = read_sparse_block(&mut self.reader)?;

        self.reader.seek(SeekFrom::Start(offsets.minutely_start))?;
        let minutes = read_sparse_block(&mut self.reader)?;

        self.reader.seek(SeekFrom::Start(offsets.hourly_start))?;
        let hourly_len = read_u32(&mut self.reader)? as usize;
        let mut hourly_bytes = vec![0u8; hourly_len];
        self.reader.read_exact(&mut hourly_bytes)?;
        let hourly = StatAccumulator::deserialize(&hourly_bytes)?;

        Ok(PathHourData {
            seconds,
            minutes,
            hourly,
        })
    }
}

fn read_sparse_block<R: Read>(reader: &mut R) -> CheckpointResult<Vec<(u32, StatAccumulator)>> {
    let count = read_u32(reader)? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let offset = read_u32(reader)?;
        let len = read_u32(reader)? as usize;
        let mut bytes = vec![0u8; len];
        reader.read_exact(&mut bytes)?;
        out.push((offset, StatAccumulator::deserialize(&bytes)?));
    }
    Ok(out)
}

fn read_u32<R: Read>(reader: &mut R) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::AggregateKind;
    use tempfile::tempdir;

    fn frozen(values: &[f64]) -> Vec<u8> {
        let mut acc = StatAccumulator::new();
        for v in values {
            acc.update(*v).unwrap();
        }
        acc.freeze();
        acc.serialize().unwrap()
    }

    fn put(tier: &DurableTier, series: &str, resolution: Resolution, bucket: i64, values: &[f64]) {
        let key = BucketKey {
            series: series.to_string(),
            resolution,
            bucket,
        };
        tier.put(&key, &frozen(values)).unwrap();
    }

    /// Populate hour 5 for two acme paths plus decoys that must be skipped
    fn seeded_tier(dir: &Path) -> DurableTier {
        let tier = DurableTier::open(dir.join("shard_0.db")).unwrap();
        let hour = 5i64;

        // acme/cpu: two seconds, one minute, one hourly
        put(&tier, "acme/cpu", Resolution::Secondly, hour * 3_600 + 3, &[1.0, 2.0]);
        put(&tier, "acme/cpu", Resolution::Secondly, hour * 3_600 + 59, &[4.0]);
        put(&tier, "acme/cpu", Resolution::Minutely, hour * 60, &[1.0, 2.0, 4.0]);
        put(&tier, "acme/cpu", Resolution::Hourly, hour, &[1.0, 2.0, 4.0]);

        // acme/mem: hourly only
        put(&tier, "acme/mem", Resolution::Hourly, hour, &[8.0]);

        // acme/orphan has seconds but no hourly bucket: must not be indexed
        put(&tier, "acme/orphan", Resolution::Secondly, hour * 3_600, &[9.0]);

        // Another tenant entirely
        put(&tier, "globex/cpu", Resolution::Hourly, hour, &[7.0]);

        tier
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let dir = tempdir().unwrap();
        let tier = seeded_tier(dir.path());
        let out = dir.path().join("acme_h5.ckpt");

        let summary = write_checkpoint("acme", &tier, &out, 5).unwrap().unwrap();
        assert_eq!(summary.metric_paths, 2);
        assert!(out.exists());
        assert!(!out.with_extension("tmp").exists());

        let mut reader = CheckpointReader::open(&out).unwrap();
        assert_eq!(reader.metric_paths(), vec!["acme/cpu", "acme/mem"]);

        let cpu = reader.read_path("acme/cpu").unwrap();
        assert_eq!(cpu.seconds.len(), 2);
        assert_eq!(cpu.seconds[0].0, 3);
        assert_eq!(cpu.seconds[0].1.aggregate(AggregateKind::Sum), 3.0);
        assert_eq!(cpu.seconds[1].0, 59);
        assert_eq!(cpu.minutes.len(), 1);
        assert_eq!(cpu.minutes[0].0, 0);
        assert_eq!(cpu.minutes[0].1.aggregate(AggregateKind::Count), 3.0);
        assert_eq!(cpu.hourly.aggregate(AggregateKind::Max), 4.0);

        let mem = reader.read_path("acme/mem").unwrap();
        assert!(mem.seconds.is_empty());
        assert!(mem.minutes.is_empty());
        assert_eq!(mem.hourly.aggregate(AggregateKind::Sum), 8.0);

        // Paths without an hourly bucket are neither written nor indexed
        assert!(reader.offsets_of("acme/orphan").is_none());
        assert!(reader.offsets_of("globex/cpu").is_none());
        assert!(matches!(
            reader.read_path("acme/orphan"),
            Err(CheckpointError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_no_qualifying_paths_writes_nothing() {
        let dir = tempdir().unwrap();
        let tier = seeded_tier(dir.path());
        let out = dir.path().join("acme_h6.ckpt");

        // Hour 6 has no hourly accumulators for acme
        let summary = write_checkpoint("acme", &tier, &out, 6).unwrap();
        assert!(summary.is_none());
        assert!(!out.exists());
    }

    #[test]
    fn test_offsets_are_monotonic_and_bounded() {
        let dir = tempdir().unwrap();
        let tier = seeded_tier(dir.path());
        let out = dir.path().join("acme_h5.ckpt");

        write_checkpoint("acme", &tier, &out, 5).unwrap().unwrap();
        let reader = CheckpointReader::open(&out).unwrap();

        let mut previous_end = 0u64;
        for path in ["acme/cpu", "acme/mem"] {
            let o = reader.offsets_of(path).unwrap();
            assert_eq!(o.secondly_start, previous_end);
            assert!(o.secondly_start < o.minutely_start);
            assert!(o.minutely_start < o.hourly_start);
            assert!(o.hourly_start < o.end);
            previous_end = o.end;
        }
    }

    #[test]
    fn test_truncated_or_corrupt_file_is_rejected() {
        let dir = tempdir().unwrap();

        // Shorter than the trailer itself
        let stub = dir.path().join("stub.ckpt");
        std::fs::write(&stub, [0u8; 4]).unwrap();
        assert!(matches!(
            CheckpointReader::open(&stub),
            Err(CheckpointError::InvalidFormat(_))
        ));

        // Trailer pointing past the end of the file
        let bad = dir.path().join("bad.ckpt");
        let mut bytes = vec![0u8; 8];
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        std::fs::write(&bad, &bytes).unwrap();
        assert!(matches!(
            CheckpointReader::open(&bad),
            Err(CheckpointError::InvalidFormat(_))
        ));
    }
}
