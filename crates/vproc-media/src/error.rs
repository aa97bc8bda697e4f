//! Media operation errors.

use std::path::PathBuf;
use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

/// Failure of a probe, trim or transcode.
///
/// The pipeline only distinguishes `Cancelled` from everything else; the
/// remaining variants exist for logs.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("ffmpeg binary not found in PATH")]
    FfmpegNotFound,

    #[error("ffprobe binary not found in PATH")]
    FfprobeNotFound,

    /// ffmpeg ran and exited unsuccessfully.
    #[error("ffmpeg failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// ffprobe ran and exited unsuccessfully.
    #[error("ffprobe failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("input file not found: {0}")]
    FileNotFound(PathBuf),

    /// Interrupted by the abort signal; the child process was killed.
    #[error("media operation cancelled")]
    Cancelled,

    #[error("media operation timed out after {0}s")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed ffprobe output: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// The probe succeeded but the container has no usable duration.
    #[error("invalid video: {0}")]
    InvalidVideo(String),
}

impl MediaError {
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn invalid_video(message: impl Into<String>) -> Self {
        Self::InvalidVideo(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MediaError::Cancelled)
    }
}
