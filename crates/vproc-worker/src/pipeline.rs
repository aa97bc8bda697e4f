//! Per-job pipeline executor.
//!
//! A job moves through `MarkingProcessing -> ResolvingSource -> Probing ->
//! (Trimming)? -> Transcoding -> Finalizing`. The first stage is a
//! compare-and-set claim on the video record: a record that is already
//! terminal short-circuits to success without touching any media, and a
//! record held by another live delivery is deferred.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tempfile::TempPath;
use tracing::{debug, warn};

use vproc_media::{MediaError, MediaOperations};
use vproc_models::{VideoAccess, VideoId};
use vproc_queue::VideoProcessingJob;
use vproc_storage::LocalStorage;
use vproc_store::{ProcessingClaim, VideoStatusStore};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics::record_media;

/// Failure reasons written to the video record.
pub mod reasons {
    pub const VIDEO_NOT_FOUND: &str = "video not found";
    pub const PROBE_FAILED: &str = "failed to get video duration";
    pub const TRIM_FAILED: &str = "failed to trim video";
    pub const TRANSCODE_FAILED: &str = "failed to convert video to 720p";
}

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    MarkingProcessing,
    ResolvingSource,
    Probing,
    Trimming,
    Transcoding,
    Finalizing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::MarkingProcessing => "marking_processing",
            Stage::ResolvingSource => "resolving_source",
            Stage::Probing => "probing",
            Stage::Trimming => "trimming",
            Stage::Transcoding => "transcoding",
            Stage::Finalizing => "finalizing",
        }
    }
}

/// Why a job finished without running the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyProcessed,
    AlreadyFailed,
}

/// Successful result of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The asset was produced and the record moved to `processed`.
    Processed { path: PathBuf },
    /// The record was already terminal; nothing ran.
    Skipped(SkipReason),
    /// Another delivery holds the processing lease taken at `since`.
    /// The message must stay pending so it is redelivered later.
    Deferred { since: DateTime<Utc> },
}

impl JobOutcome {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Processed { .. } => "processed",
            JobOutcome::Skipped(SkipReason::AlreadyProcessed) => "skipped_processed",
            JobOutcome::Skipped(SkipReason::AlreadyFailed) => "skipped_failed",
            JobOutcome::Deferred { .. } => "deferred",
        }
    }

    /// Whether the delivery should be acknowledged.
    pub fn should_ack(&self) -> bool {
        !matches!(self, JobOutcome::Deferred { .. })
    }
}

/// Settings the pipeline reads on every job.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Videos longer than this many seconds are trimmed
    pub max_video_duration: u64,
    /// Directory for per-job temporary files
    pub work_dir: PathBuf,
}

/// Runs the processing pipeline for one video at a time.
///
/// Holds no per-job state, so one executor is shared by every worker.
pub struct PipelineExecutor {
    store: Arc<dyn VideoStatusStore>,
    media: Arc<dyn MediaOperations>,
    storage: LocalStorage,
    settings: PipelineSettings,
}

impl PipelineExecutor {
    pub fn new(
        store: Arc<dyn VideoStatusStore>,
        media: Arc<dyn MediaOperations>,
        storage: LocalStorage,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            media,
            storage,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Process one video processing job.
    ///
    /// Any stage failure after the claim is recorded on the video record
    /// (best effort) and returned so the broker's retry policy can decide.
    pub async fn process(
        &self,
        job: &VideoProcessingJob,
        logger: &JobLogger,
    ) -> WorkerResult<JobOutcome> {
        let id = &job.video_id;

        logger.log_stage(Stage::MarkingProcessing);
        match self.store.mark_processing(id).await? {
            ProcessingClaim::Claimed => {}
            ProcessingClaim::AlreadyProcessed => {
                logger.log_progress("already processed, skipping");
                return Ok(JobOutcome::Skipped(SkipReason::AlreadyProcessed));
            }
            ProcessingClaim::AlreadyFailed => {
                logger.log_progress("already failed, skipping");
                return Ok(JobOutcome::Skipped(SkipReason::AlreadyFailed));
            }
            ProcessingClaim::InFlight { since } => {
                logger.log_progress(&format!("held by another delivery since {since}, deferring"));
                return Ok(JobOutcome::Deferred { since });
            }
        }

        let result = self.run_claimed(id, logger).await;

        if let Err(e) = &result {
            match failure_reason(e) {
                Some(reason) => self.mark_failed_best_effort(id, reason, logger).await,
                None if e.is_cancelled() => self.release_claim_best_effort(id, logger).await,
                None => {}
            }
        }

        result
    }

    async fn run_claimed(&self, id: &VideoId, logger: &JobLogger) -> WorkerResult<JobOutcome> {
        logger.log_stage(Stage::ResolvingSource);
        let source = self.resolve_source(id).await?;

        logger.log_stage(Stage::Probing);
        let duration = observe_media(Stage::Probing, self.media.probe_duration(&source))
            .await
            .map_err(media_error(WorkerError::Probe))?;
        debug!(video_id = %id, duration, "Probed source duration");

        // Held until this function returns, so the trimmed file is removed
        // on every exit path including unwinding.
        let mut trimmed: Option<TempPath> = None;
        let max = self.settings.max_video_duration;
        if duration > max as f64 {
            logger.log_stage(Stage::Trimming);
            let temp = self
                .temp_trim_path(id)
                .map_err(|e| WorkerError::Trim(MediaError::Io(e)))?;
            observe_media(Stage::Trimming, self.media.trim(&source, &temp, max))
                .await
                .map_err(media_error(WorkerError::Trim))?;
            logger.log_progress(&format!("trimmed {duration:.1}s source to {max}s"));
            trimmed = Some(temp);
        }
        let input: &Path = trimmed.as_deref().unwrap_or(&source);

        logger.log_stage(Stage::Transcoding);
        let destination = self.storage.processed_destination(id);
        observe_media(Stage::Transcoding, self.media.transcode(input, &destination))
            .await
            .map_err(media_error(WorkerError::Transcode))?;

        logger.log_stage(Stage::Finalizing);
        self.store
            .mark_processed(id, &destination.to_string_lossy())
            .await?;

        Ok(JobOutcome::Processed { path: destination })
    }

    /// Privileged lookup of the raw upload, bypassing the ownership check.
    async fn resolve_source(&self, id: &VideoId) -> WorkerResult<PathBuf> {
        let record = match self.store.get(id, VideoAccess::Internal).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(WorkerError::video_not_found(id.as_str())),
            Err(e) => return Err(WorkerError::video_not_found(format!("{id}: {e}"))),
        };

        self.storage
            .full_path(&record.original_path_ref)
            .map_err(|e| WorkerError::video_not_found(format!("{id}: {e}")))
    }

    /// Create a unique temp file in the work directory for the trimmed video.
    fn temp_trim_path(&self, id: &VideoId) -> std::io::Result<TempPath> {
        std::fs::create_dir_all(&self.settings.work_dir)?;
        let prefix = format!("{}_", file_safe(id.as_str()));
        Ok(tempfile::Builder::new()
            .prefix(&prefix)
            .suffix("_trimmed.mp4")
            .tempfile_in(&self.settings.work_dir)?
            .into_temp_path())
    }

    async fn mark_failed_best_effort(&self, id: &VideoId, reason: &str, logger: &JobLogger) {
        if let Err(e) = self.store.mark_failed(id, reason).await {
            logger.log_warning(&format!("could not mark video failed ({reason}): {e}"));
        }
    }

    async fn release_claim_best_effort(&self, id: &VideoId, logger: &JobLogger) {
        if let Err(e) = self.store.release_claim(id).await {
            warn!(video_id = %id, "Could not release processing claim: {}", e);
        } else {
            logger.log_progress("cancelled, processing claim released");
        }
    }
}

/// Reason recorded on the video for a stage failure, if the stage records one.
pub fn failure_reason(error: &WorkerError) -> Option<&'static str> {
    match error {
        WorkerError::VideoNotFound(_) => Some(reasons::VIDEO_NOT_FOUND),
        WorkerError::Probe(_) => Some(reasons::PROBE_FAILED),
        WorkerError::Trim(_) => Some(reasons::TRIM_FAILED),
        WorkerError::Transcode(_) => Some(reasons::TRANSCODE_FAILED),
        _ => None,
    }
}

/// Map a media error to its stage error, keeping cancellation distinct.
fn media_error(stage: fn(MediaError) -> WorkerError) -> impl FnOnce(MediaError) -> WorkerError {
    move |e| {
        if e.is_cancelled() {
            WorkerError::Cancelled
        } else {
            stage(e)
        }
    }
}

async fn observe_media<T, F>(stage: Stage, fut: F) -> Result<T, MediaError>
where
    F: std::future::Future<Output = Result<T, MediaError>>,
{
    let start = Instant::now();
    let result = fut.await;
    record_media(stage.as_str(), result.is_ok(), start.elapsed().as_secs_f64());
    result
}

fn file_safe(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reasons() {
        assert_eq!(
            failure_reason(&WorkerError::Transcode(MediaError::Timeout(1))),
            Some("failed to convert video to 720p")
        );
        assert_eq!(
            failure_reason(&WorkerError::video_not_found("v1")),
            Some("video not found")
        );
        assert_eq!(failure_reason(&WorkerError::Cancelled), None);
        assert_eq!(
            failure_reason(&WorkerError::StatusUpdate(vproc_store::StoreError::not_found("v1"))),
            None
        );
    }

    #[test]
    fn test_cancellation_is_not_a_stage_failure() {
        let map = media_error(WorkerError::Trim);
        assert!(map(MediaError::Cancelled).is_cancelled());

        let map = media_error(WorkerError::Trim);
        assert!(matches!(map(MediaError::Timeout(3)), WorkerError::Trim(_)));
    }

    #[test]
    fn test_file_safe() {
        assert_eq!(file_safe("v1"), "v1");
        assert_eq!(file_safe("user/../v 1"), "user____v_1");
    }

    #[test]
    fn test_outcome_ack() {
        assert!(JobOutcome::Skipped(SkipReason::AlreadyProcessed).should_ack());
        assert!(!JobOutcome::Deferred { since: Utc::now() }.should_ack());
        assert_eq!(
            JobOutcome::Processed {
                path: PathBuf::from("/p/v1_processed.mp4")
            }
            .label(),
            "processed"
        );
    }
}
