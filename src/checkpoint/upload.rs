//! Hourly checkpoint upload orchestration
//!
//! Walks every tenant across every shard, writes one checkpoint per
//! (tenant, shard) via the codec, hands each file to the upload
//! collaborator, then advances the node's "last checkpointed hour"
//! watermark. The no-argument entry point targets
//! `min(watermark + 1, now_hour - admission_window)`: it never checkpoints
//! an hour still inside the live admission window and never skips the
//! watermark ahead by more than one hour per call.

use crate::checkpoint::codec::write_checkpoint;
use crate::checkpoint::error::{CheckpointError, CheckpointResult};
use crate::store::DurableTier;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Makes a local checkpoint durably available off-box
///
/// Re-upload of the same (tenant, hour, shard) must be safe.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        tenant: &str,
        hour: i64,
        shard: u32,
        local: &Path,
    ) -> CheckpointResult<()>;
}

/// Stores the per-node "last checkpointed hour" watermark
#[async_trait]
pub trait NodeStateRegistry: Send + Sync {
    async fn last_checkpointed_hour(&self) -> CheckpointResult<Option<i64>>;
    async fn set_last_checkpointed_hour(&self, hour: i64) -> CheckpointResult<()>;
}

/// Resolves local filesystem locations for checkpoint artifacts
pub trait PathRegistry: Send + Sync {
    fn checkpoint_path(&self, tenant: &str, hour: i64, shard: u32) -> PathBuf;
}

/// Default on-disk layout: `<root>/hour_<h>/<tenant>/shard_<s>.ckpt`
pub struct LocalPathRegistry {
    root: PathBuf,
}

impl LocalPathRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PathRegistry for LocalPathRegistry {
    fn checkpoint_path(&self, tenant: &str, hour: i64, shard: u32) -> PathBuf {
        self.root
            .join(format!("hour_{}", hour))
            .join(tenant)
            .join(format!("shard_{}.ckpt", shard))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NodeState {
    last_checkpointed_hour: Option<i64>,
}

/// JSON-file-backed watermark registry
pub struct FileNodeStateRegistry {
    path: PathBuf,
    state: Mutex<NodeState>,
}

impl FileNodeStateRegistry {
    /// Load existing state from `path`, or start empty
    pub fn open(path: impl Into<PathBuf>) -> CheckpointResult<Self> {
        let path = path.into();
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)
                .map_err(|e| CheckpointError::NodeState(format!("Bad state file: {}", e)))?
        } else {
            NodeState::default()
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn save(&self, state: &NodeState) -> CheckpointResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| CheckpointError::NodeState(e.to_string()))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

#[async_trait]
impl NodeStateRegistry for FileNodeStateRegistry {
    async fn last_checkpointed_hour(&self) -> CheckpointResult<Option<i64>> {
        Ok(self.state.lock().await.last_checkpointed_hour)
    }

    async fn set_last_checkpointed_hour(&self, hour: i64) -> CheckpointResult<()> {
        let mut state = self.state.lock().await;
        state.last_checkpointed_hour = Some(hour);
        self.save(&state)
    }
}

/// Orchestrates the hourly archival pass over all shards
pub struct CheckpointUploader {
    tiers: BTreeMap<u32, Arc<DurableTier>>,
    paths: Arc<dyn PathRegistry>,
    uploader: Arc<dyn Uploader>,
    node_state: Arc<dyn NodeStateRegistry>,
    /// Hours still considered live for late-arriving samples
    admission_window_hours: i64,
}

impl CheckpointUploader {
    pub fn new(
        tiers: BTreeMap<u32, Arc<DurableTier>>,
        paths: Arc<dyn PathRegistry>,
        uploader: Arc<dyn Uploader>,
        node_state: Arc<dyn NodeStateRegistry>,
        admission_window_hours: i64,
    ) -> Self {
        Self {
            tiers,
            paths,
            uploader,
            node_state,
            admission_window_hours,
        }
    }

    /// Checkpoint and upload every (tenant, shard) for one hour, then
    /// advance the watermark
    ///
    /// The watermark moves only after every upload for the hour succeeded;
    /// a failure leaves it unchanged so the whole hour is retried.
    pub async fn upload_hour(&self, hour: i64) -> CheckpointResult<usize> {
        let mut tenants = BTreeSet::new();
        for tier in self.tiers.values() {
            tenants.extend(tier.list_tenants()?);
        }

        let mut uploaded = 0;
        for tenant in &tenants {
            for (shard, tier) in &self.tiers {
                let out_path = self.paths.checkpoint_path(tenant, hour, *shard);
                if let Some(summary) = write_checkpoint(tenant, tier, &out_path, hour)? {
                    self.uploader
                        .upload(tenant, hour, *shard, &summary.path)
                        .await?;
                    uploaded += 1;
                }
            }
        }

        self.node_state.set_last_checkpointed_hour(hour).await?;
        tracing::info!(hour, uploaded, tenants = tenants.len(), "Hourly checkpoint pass done");
        Ok(uploaded)
    }

    /// Upload the next eligible hour relative to `now_ms`
    ///
    /// Target is `min(watermark + 1, now_hour - admission_window)`; returns
    /// the hour processed, or `None` when nothing is eligible yet.
    pub async fn upload_next(&self, now_ms: i64) -> CheckpointResult<Option<i64>> {
        let now_hour = now_ms / 3_600_000;
        let newest_eligible = now_hour - self.admission_window_hours;

        let target = match self.node_state.last_checkpointed_hour().await? {
            Some(watermark) => {
                let target = (watermark + 1).min(newest_eligible);
                if target <= watermark {
                    tracing::debug!(watermark, newest_eligible, "No hour eligible yet");
                    return Ok(None);
                }
                target
            }
            None => newest_eligible,
        };

        self.upload_hour(target).await?;
        Ok(Some(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::{BucketKey, Resolution, StatAccumulator};
    use tempfile::tempdir;

    /// Records uploads; optionally fails every call
    struct RecordingUploader {
        calls: Mutex<Vec<(String, i64, u32)>>,
        fail: bool,
    }

    impl RecordingUploader {
        fn new(fail: bool) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl Uploader for RecordingUploader {
        async fn upload(
            &self,
            tenant: &str,
            hour: i64,
            shard: u32,
            local: &Path,
        ) -> CheckpointResult<()> {
            if self.fail {
                return Err(CheckpointError::Upload("injected".into()));
            }
            assert!(local.exists());
            self.calls
                .lock()
                .await
                .push((tenant.to_string(), hour, shard));
            Ok(())
        }
    }

    fn put_hourly(tier: &DurableTier, series: &str, hour: i64) {
        let mut acc = StatAccumulator::new();
        acc.update(1.0).unwrap();
        acc.freeze();
        let key = BucketKey {
            series: series.to_string(),
            resolution: Resolution::Hourly,
            bucket: hour,
        };
        tier.put(&key, &acc.serialize().unwrap()).unwrap();
    }

    fn uploader_fixture(
        dir: &Path,
        fail: bool,
    ) -> (CheckpointUploader, Arc<RecordingUploader>, Arc<FileNodeStateRegistry>) {
        let shard0 = Arc::new(DurableTier::open(dir.join("shard_0.db")).unwrap());
        let shard1 = Arc::new(DurableTier::open(dir.join("shard_1.db")).unwrap());
        put_hourly(&shard0, "acme/cpu", 10);
        put_hourly(&shard1, "globex/mem", 10);

        let mut tiers = BTreeMap::new();
        tiers.insert(0u32, shard0);
        tiers.insert(1u32, shard1);

        let recorder = Arc::new(RecordingUploader::new(fail));
        let node_state = Arc::new(FileNodeStateRegistry::open(dir.join("node_state.json")).unwrap());

        let uploader = CheckpointUploader::new(
            tiers,
            Arc::new(LocalPathRegistry::new(dir.join("checkpoints"))),
            recorder.clone(),
            node_state.clone(),
            2,
        );
        (uploader, recorder, node_state)
    }

    #[tokio::test]
    async fn test_upload_hour_covers_tenants_and_shards() {
        let dir = tempdir().unwrap();
        let (uploader, recorder, node_state) = uploader_fixture(dir.path(), false);

        let uploaded = uploader.upload_hour(10).await.unwrap();
        // acme only has data in shard 0, globex only in shard 1
        assert_eq!(uploaded, 2);

        let calls = recorder.calls.lock().await.clone();
        assert!(calls.contains(&("acme".to_string(), 10, 0)));
        assert!(calls.contains(&("globex".to_string(), 10, 1)));

        assert_eq!(node_state.last_checkpointed_hour().await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_upload_failure_leaves_watermark() {
        let dir = tempdir().unwrap();
        let (uploader, _recorder, node_state) = uploader_fixture(dir.path(), true);

        assert!(uploader.upload_hour(10).await.is_err());
        assert_eq!(node_state.last_checkpointed_hour().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upload_next_respects_admission_window() {
        let dir = tempdir().unwrap();
        let (uploader, _recorder, node_state) = uploader_fixture(dir.path(), false);

        // now at hour 12, admission window 2 → newest eligible is hour 10
        let now_ms = 12 * 3_600_000;
        assert_eq!(uploader.upload_next(now_ms).await.unwrap(), Some(10));
        assert_eq!(node_state.last_checkpointed_hour().await.unwrap(), Some(10));

        // Watermark caught up to the admission window: nothing eligible
        assert_eq!(uploader.upload_next(now_ms).await.unwrap(), None);

        // One hour later, exactly one more hour becomes eligible
        let later = 13 * 3_600_000;
        assert_eq!(uploader.upload_next(later).await.unwrap(), Some(11));
    }

    #[tokio::test]
    async fn test_upload_next_advances_one_hour_per_call() {
        let dir = tempdir().unwrap();
        let (uploader, _recorder, node_state) = uploader_fixture(dir.path(), false);
        node_state.set_last_checkpointed_hour(3).await.unwrap();

        // Far behind: still only watermark+1 per call
        let now_ms = 100 * 3_600_000;
        assert_eq!(uploader.upload_next(now_ms).await.unwrap(), Some(4));
        assert_eq!(uploader.upload_next(now_ms).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_file_registry_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let registry = FileNodeStateRegistry::open(&path).unwrap();
            registry.set_last_checkpointed_hour(42).await.unwrap();
        }

        let registry = FileNodeStateRegistry::open(&path).unwrap();
        assert_eq!(registry.last_checkpointed_hour().await.unwrap(), Some(42));
    }
}
