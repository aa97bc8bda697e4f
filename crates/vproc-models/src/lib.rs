//! Shared data models for the video processing pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Video identifiers, statuses and the status-store record projection
//! - Job type tags used by the queue and worker dispatch
//! - Transcode target and encoding configuration

pub mod encoding;
pub mod job;
pub mod video;

// Re-export common types
pub use encoding::{EncodingConfig, TargetResolution};
pub use job::{JobType, UnknownJobType};
pub use video::{InvalidVideoId, VideoAccess, VideoId, VideoRecord, VideoStatus};
