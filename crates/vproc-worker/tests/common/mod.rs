//! Shared fixtures for worker integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::watch;

use vproc_media::{MediaError, MediaOperations, MediaResult};
use vproc_models::{VideoAccess, VideoId, VideoRecord, VideoStatus};
use vproc_storage::{LocalStorage, StorageConfig};
use vproc_store::{MemoryVideoStore, ProcessingClaim, StoreError, StoreResult, VideoStatusStore};
use vproc_worker::{JobLogger, PipelineExecutor, PipelineSettings};

pub const MAX_VIDEO_DURATION: u64 = 30;

/// A media call seen by [`FakeMedia`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Probe(PathBuf),
    Trim {
        input: PathBuf,
        output: PathBuf,
        max_seconds: u64,
    },
    Transcode {
        input: PathBuf,
        output: PathBuf,
        input_existed: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    Probe,
    Trim,
    Transcode,
    CancelTranscode,
}

/// Media operations that record their calls and write placeholder files.
pub struct FakeMedia {
    duration: f64,
    fault: Fault,
    transcode_delay: Duration,
    cancel: Option<watch::Receiver<bool>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeMedia {
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            fault: Fault::None,
            transcode_delay: Duration::ZERO,
            cancel: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = fault;
        self
    }

    /// Make transcode take `delay`, returning early with `Cancelled` on abort.
    pub fn with_transcode_delay(mut self, delay: Duration) -> Self {
        self.transcode_delay = delay;
        self
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn transcode_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Transcode { .. }))
            .count()
    }

    pub fn trim_output(&self) -> Option<PathBuf> {
        self.calls().into_iter().find_map(|c| match c {
            Call::Trim { output, .. } => Some(output),
            _ => None,
        })
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

async fn aborted(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|aborted| *aborted).await;
}

#[async_trait]
impl MediaOperations for FakeMedia {
    async fn probe_duration(&self, path: &Path) -> MediaResult<f64> {
        self.record(Call::Probe(path.to_path_buf()));
        if self.fault == Fault::Probe {
            return Err(MediaError::invalid_video("no duration in container"));
        }
        Ok(self.duration)
    }

    async fn trim(&self, input: &Path, output: &Path, max_seconds: u64) -> MediaResult<()> {
        self.record(Call::Trim {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            max_seconds,
        });
        if self.fault == Fault::Trim {
            return Err(MediaError::ffmpeg_failed("trim exited", None, Some(1)));
        }
        tokio::fs::write(output, b"trimmed").await?;
        Ok(())
    }

    async fn transcode(&self, input: &Path, output: &Path) -> MediaResult<()> {
        self.record(Call::Transcode {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            input_existed: input.exists(),
        });

        if !self.transcode_delay.is_zero() {
            let delay = tokio::time::sleep(self.transcode_delay);
            match self.cancel.clone() {
                Some(rx) => {
                    tokio::select! {
                        _ = delay => {}
                        _ = aborted(rx) => return Err(MediaError::Cancelled),
                    }
                }
                None => delay.await,
            }
        }

        match self.fault {
            Fault::Transcode => {
                return Err(MediaError::ffmpeg_failed("transcode exited", None, Some(1)))
            }
            Fault::CancelTranscode => return Err(MediaError::Cancelled),
            _ => {}
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, b"720p").await?;
        Ok(())
    }
}

/// Store wrapper that injects failures into selected operations.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryVideoStore,
    pub hide_records: bool,
    pub fail_mark_failed: bool,
    pub fail_mark_processed: bool,
}

#[async_trait]
impl VideoStatusStore for FlakyStore {
    async fn get(&self, id: &VideoId, access: VideoAccess) -> StoreResult<Option<VideoRecord>> {
        if self.hide_records {
            return Ok(None);
        }
        self.inner.get(id, access).await
    }

    async fn mark_processing(&self, id: &VideoId) -> StoreResult<ProcessingClaim> {
        self.inner.mark_processing(id).await
    }

    async fn mark_processed(&self, id: &VideoId, processed_path: &str) -> StoreResult<()> {
        if self.fail_mark_processed {
            return Err(StoreError::corrupt(id.as_str(), "write rejected"));
        }
        self.inner.mark_processed(id, processed_path).await
    }

    async fn mark_failed(&self, id: &VideoId, reason: &str) -> StoreResult<()> {
        if self.fail_mark_failed {
            return Err(StoreError::corrupt(id.as_str(), "write rejected"));
        }
        self.inner.mark_failed(id, reason).await
    }

    async fn release_claim(&self, id: &VideoId) -> StoreResult<()> {
        self.inner.release_claim(id).await
    }
}

/// Executor wired to an in-memory store, fake media and temp directories.
pub struct Harness {
    pub store: MemoryVideoStore,
    pub media: Arc<FakeMedia>,
    pub storage: LocalStorage,
    pub executor: Arc<PipelineExecutor>,
    pub work_dir: PathBuf,
    _root: TempDir,
}

impl Harness {
    pub fn new(media: FakeMedia) -> Self {
        Self::build(media, |store| Arc::new(store) as Arc<dyn VideoStatusStore>)
    }

    /// Build with the status store wrapped by `wrap`.
    pub fn build<F>(media: FakeMedia, wrap: F) -> Self
    where
        F: FnOnce(MemoryVideoStore) -> Arc<dyn VideoStatusStore>,
    {
        let root = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(StorageConfig {
            upload_dir: root.path().join("uploads"),
            processed_dir: root.path().join("processed"),
            base_url: "http://localhost:8080/uploads".to_string(),
        });
        std::fs::create_dir_all(storage.upload_dir()).unwrap();
        let work_dir = root.path().join("work");

        let store = MemoryVideoStore::new();
        let media = Arc::new(media);
        let executor = PipelineExecutor::new(
            wrap(store.clone()),
            media.clone(),
            storage.clone(),
            PipelineSettings {
                max_video_duration: MAX_VIDEO_DURATION,
                work_dir: work_dir.clone(),
            },
        );

        Self {
            store,
            media,
            storage,
            executor: Arc::new(executor),
            work_dir,
            _root: root,
        }
    }

    /// Register an uploaded video with a raw file at `{id}.mp4`.
    pub fn upload(&self, id: &str) -> VideoId {
        let reference = format!("{id}.mp4");
        std::fs::write(self.storage.upload_dir().join(&reference), b"raw").unwrap();
        self.upload_with_reference(id, &reference)
    }

    pub fn upload_with_reference(&self, id: &str, reference: &str) -> VideoId {
        let id = VideoId::from(id);
        self.store
            .create(VideoRecord::uploaded(id.clone(), "user-1", reference))
            .unwrap();
        id
    }

    pub async fn record(&self, id: &VideoId) -> VideoRecord {
        self.store
            .get(id, VideoAccess::Internal)
            .await
            .unwrap()
            .expect("record exists")
    }

    pub async fn status(&self, id: &VideoId) -> VideoStatus {
        self.record(id).await.status
    }

    /// Poll until the record reaches `status`.
    pub async fn wait_for_status(&self, id: &VideoId, status: VideoStatus) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.status(id).await != status {
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {id} to become {status}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Number of entries left in the work directory.
    pub fn work_dir_entries(&self) -> usize {
        std::fs::read_dir(&self.work_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub fn logger(id: &VideoId) -> JobLogger {
    JobLogger::new("1-0", id, "video-processing")
}

/// Poll a synchronous condition until it holds.
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
