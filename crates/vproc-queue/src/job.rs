//! Job envelopes and their wire encoding.
//!
//! A queue message carries the job type tag and the JSON payload as two
//! separate fields, so the payload of a video processing job is the flat
//! object `{"video_id": "..."}`.

use serde::{Deserialize, Serialize};
use vproc_models::{JobType, VideoId};

use crate::error::{QueueError, QueueResult};

/// Job to probe, trim and transcode one uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoProcessingJob {
    /// Video to process
    pub video_id: VideoId,
}

impl VideoProcessingJob {
    /// Create a job, rejecting a blank video id.
    pub fn new(video_id: VideoId) -> QueueResult<Self> {
        if video_id.is_blank() {
            return Err(QueueError::invalid_payload("video_id must not be empty"));
        }
        Ok(Self { video_id })
    }
}

/// Any job the queue can carry, dispatched by type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueJob {
    VideoProcessing(VideoProcessingJob),
}

impl QueueJob {
    pub fn job_type(&self) -> JobType {
        match self {
            QueueJob::VideoProcessing(_) => JobType::VideoProcessing,
        }
    }

    pub fn video_id(&self) -> &VideoId {
        match self {
            QueueJob::VideoProcessing(job) => &job.video_id,
        }
    }

    /// Serialize the payload field of the queue message.
    pub fn payload(&self) -> QueueResult<String> {
        let payload = match self {
            QueueJob::VideoProcessing(job) => serde_json::to_string(job)?,
        };
        Ok(payload)
    }

    /// Rebuild a job from the type tag and payload of a queue message.
    pub fn decode(job_type: &str, payload: &str) -> QueueResult<Self> {
        let job_type: JobType = job_type
            .parse()
            .map_err(|e: vproc_models::UnknownJobType| QueueError::invalid_payload(e.to_string()))?;

        match job_type {
            JobType::VideoProcessing => {
                let job: VideoProcessingJob = serde_json::from_str(payload)
                    .map_err(|e| QueueError::invalid_payload(format!("{job_type}: {e}")))?;
                VideoProcessingJob::new(job.video_id).map(QueueJob::VideoProcessing)
            }
        }
    }
}

impl From<VideoProcessingJob> for QueueJob {
    fn from(job: VideoProcessingJob) -> Self {
        QueueJob::VideoProcessing(job)
    }
}
