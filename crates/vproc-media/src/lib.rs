//! FFmpeg CLI wrapper for video processing.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Cancellation and timeouts via tokio
//! - Duration probing, trimming and fixed-resolution transcoding
//! - The `MediaOperations` seam the worker pipeline is written against

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod ops;
pub mod probe;
pub mod progress;
pub mod transcode;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use ops::{FfmpegMedia, MediaOperations};
pub use probe::{get_duration, probe_video, VideoInfo};
pub use progress::{FfmpegProgress, ProgressCallback};
pub use transcode::{convert_to_resolution, trim_video};
