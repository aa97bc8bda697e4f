//! Video record models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a video identifier is empty or blank.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("video id must not be empty")]
pub struct InvalidVideoId;

/// Stable identifier of an uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Create a validated video ID.
    pub fn parse(s: impl Into<String>) -> Result<Self, InvalidVideoId> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(InvalidVideoId);
        }
        Ok(Self(s))
    }

    /// Create from an existing string without validation.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the identifier is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Video processing status.
///
/// Statuses only move forward: `uploaded -> processing -> processed | failed`.
/// `processed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Raw upload stored, waiting for a worker
    #[default]
    Uploaded,
    /// A worker holds the processing lease
    Processing,
    /// Distributable asset produced
    Processed,
    /// Processing failed
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Uploaded => "uploaded",
            VideoStatus::Processing => "processing",
            VideoStatus::Processed => "processed",
            VideoStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Processed | VideoStatus::Failed)
    }

    /// Check whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        matches!(
            (self, next),
            (VideoStatus::Uploaded, VideoStatus::Processing)
                | (VideoStatus::Uploaded, VideoStatus::Failed)
                | (VideoStatus::Processing, VideoStatus::Processing)
                | (VideoStatus::Processing, VideoStatus::Processed)
                | (VideoStatus::Processing, VideoStatus::Failed)
        )
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(VideoStatus::Uploaded),
            "processing" => Ok(VideoStatus::Processing),
            "processed" => Ok(VideoStatus::Processed),
            "failed" => Ok(VideoStatus::Failed),
            other => Err(format!("unknown video status: {}", other)),
        }
    }
}

/// How a caller is allowed to read a video record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoAccess {
    /// Privileged internal read (workers). No ownership check.
    Internal,
    /// User-facing read, only succeeds for the owner.
    Owner(String),
}

/// Projection of a video record that the pipeline reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoRecord {
    /// Unique video ID
    pub id: VideoId,

    /// Owner user ID
    pub owner_id: String,

    /// Processing status
    #[serde(default)]
    pub status: VideoStatus,

    /// Reference to the raw upload, relative to the upload root
    pub original_path_ref: String,

    /// Final asset path, set on transition to `processed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_path: Option<String>,

    /// Short failure description, set on transition to `failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// When the current processing lease was taken
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_since: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl VideoRecord {
    /// Create a freshly uploaded video record.
    pub fn uploaded(
        id: VideoId,
        owner_id: impl Into<String>,
        original_path_ref: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id: owner_id.into(),
            status: VideoStatus::Uploaded,
            original_path_ref: original_path_ref.into(),
            processed_path: None,
            failure_reason: None,
            processing_since: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether `access` may read this record.
    pub fn is_visible_to(&self, access: &VideoAccess) -> bool {
        match access {
            VideoAccess::Internal => true,
            VideoAccess::Owner(user_id) => &self.owner_id == user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_id_rejects_blank() {
        assert_eq!(VideoId::parse(""), Err(InvalidVideoId));
        assert_eq!(VideoId::parse("   "), Err(InvalidVideoId));
        assert_eq!(VideoId::parse("v1").unwrap().as_str(), "v1");
    }

    #[test]
    fn test_status_transitions() {
        assert!(VideoStatus::Uploaded.can_transition_to(VideoStatus::Processing));
        assert!(VideoStatus::Processing.can_transition_to(VideoStatus::Processed));
        assert!(VideoStatus::Processing.can_transition_to(VideoStatus::Failed));
        assert!(!VideoStatus::Processed.can_transition_to(VideoStatus::Processing));
        assert!(!VideoStatus::Failed.can_transition_to(VideoStatus::Processed));
        assert!(!VideoStatus::Uploaded.can_transition_to(VideoStatus::Processed));
    }

    #[test]
    fn test_status_roundtrip_str() {
        for status in [
            VideoStatus::Uploaded,
            VideoStatus::Processing,
            VideoStatus::Processed,
            VideoStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<VideoStatus>().unwrap(), status);
        }
        assert!("done".parse::<VideoStatus>().is_err());
    }

    #[test]
    fn test_owner_visibility() {
        let record = VideoRecord::uploaded(VideoId::from("v1"), "user-1", "raw/v1.mp4");

        assert!(record.is_visible_to(&VideoAccess::Internal));
        assert!(record.is_visible_to(&VideoAccess::Owner("user-1".to_string())));
        assert!(!record.is_visible_to(&VideoAccess::Owner("user-2".to_string())));
        assert_eq!(record.status, VideoStatus::Uploaded);
    }
}
