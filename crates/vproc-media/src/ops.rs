//! Media operations the pipeline orchestrates.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use vproc_models::{EncodingConfig, TargetResolution};

use crate::command::{wait_for_cancel, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::get_duration;
use crate::transcode::{convert_to_resolution, trim_video};

/// Opaque probe/trim/transcode capabilities.
///
/// Implementations report success or failure only; the pipeline never looks
/// inside the media.
#[async_trait]
pub trait MediaOperations: Send + Sync {
    /// Duration of the media at `path`, in seconds.
    async fn probe_duration(&self, path: &Path) -> MediaResult<f64>;

    /// Write the first `max_seconds` seconds of `input` to `output`.
    async fn trim(&self, input: &Path, output: &Path, max_seconds: u64) -> MediaResult<()>;

    /// Transcode `input` to the fixed target resolution at `output`.
    async fn transcode(&self, input: &Path, output: &Path) -> MediaResult<()>;
}

/// `MediaOperations` backed by the `ffmpeg`/`ffprobe` binaries.
#[derive(Debug, Clone, Default)]
pub struct FfmpegMedia {
    target: TargetResolution,
    encoding: EncodingConfig,
    timeout: Option<Duration>,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl FfmpegMedia {
    /// Create with the default 720p target and encoding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the encoding parameters.
    pub fn with_encoding(mut self, encoding: EncodingConfig) -> Self {
        self.encoding = encoding;
        self
    }

    /// Bound every operation by `timeout`. Zero disables the bound.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Kill running operations once `cancel_rx` reads `true`.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Target resolution of `transcode`.
    pub fn target(&self) -> TargetResolution {
        self.target
    }

    fn runner(&self) -> FfmpegRunner {
        let mut runner = FfmpegRunner::new();
        if let Some(rx) = &self.cancel_rx {
            runner = runner.with_cancel(rx.clone());
        }
        if let Some(timeout) = self.timeout {
            runner = runner.with_timeout(timeout.as_secs().max(1));
        }
        runner
    }
}

#[async_trait]
impl MediaOperations for FfmpegMedia {
    async fn probe_duration(&self, path: &Path) -> MediaResult<f64> {
        let probe = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, get_duration(path))
                    .await
                    .map_err(|_| MediaError::Timeout(limit.as_secs()))?,
                None => get_duration(path).await,
            }
        };

        // ffprobe is spawned with kill_on_drop, so losing the race kills it.
        tokio::select! {
            result = probe => result,
            _ = wait_for_cancel(self.cancel_rx.clone()) => Err(MediaError::Cancelled),
        }
    }

    async fn trim(&self, input: &Path, output: &Path, max_seconds: u64) -> MediaResult<()> {
        trim_video(&self.runner(), input, output, max_seconds).await
    }

    async fn transcode(&self, input: &Path, output: &Path) -> MediaResult<()> {
        let duration_hint = get_duration(input).await.ok();
        convert_to_resolution(
            &self.runner(),
            input,
            output,
            self.target,
            &self.encoding,
            duration_hint,
        )
        .await
    }
}
