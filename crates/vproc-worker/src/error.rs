//! Worker error types.

use thiserror::Error;
use vproc_media::MediaError;
use vproc_queue::QueueError;
use vproc_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Status update failed: {0}")]
    StatusUpdate(#[source] StoreError),

    #[error("Video not found: {0}")]
    VideoNotFound(String),

    #[error("Probe failed: {0}")]
    Probe(#[source] MediaError),

    #[error("Trim failed: {0}")]
    Trim(#[source] MediaError),

    #[error("Transcode failed: {0}")]
    Transcode(#[source] MediaError),

    #[error("Invalid job payload: {0}")]
    Payload(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Job task panicked: {0}")]
    Panicked(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn video_not_found(msg: impl Into<String>) -> Self {
        Self::VideoNotFound(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::StatusUpdate(_) => "status_update",
            WorkerError::VideoNotFound(_) => "video_not_found",
            WorkerError::Probe(_) => "probe",
            WorkerError::Trim(_) => "trim",
            WorkerError::Transcode(_) => "transcode",
            WorkerError::Payload(_) => "payload",
            WorkerError::Cancelled => "cancelled",
            WorkerError::Panicked(_) => "panic",
            WorkerError::Queue(_) => "queue",
            WorkerError::Config(_) => "config",
            WorkerError::Io(_) => "io",
        }
    }

    /// Check if this is a permanent failure that should NOT be retried.
    ///
    /// A malformed envelope or a record that does not exist cannot succeed
    /// on redelivery.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            WorkerError::Payload(_) | WorkerError::StatusUpdate(StoreError::NotFound(_))
        )
    }

    /// Check if the job was interrupted by shutdown.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Cancelled)
    }
}

impl From<StoreError> for WorkerError {
    fn from(e: StoreError) -> Self {
        WorkerError::StatusUpdate(e)
    }
}
