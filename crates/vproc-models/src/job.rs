//! Job type tags.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned for a type tag no handler is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job type: {0}")]
pub struct UnknownJobType(pub String);

/// Tag selecting the handler for a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum JobType {
    /// Probe, trim and transcode an uploaded video
    #[serde(rename = "video-processing")]
    VideoProcessing,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::VideoProcessing => "video-processing",
        }
    }

    /// All job types a worker can dispatch.
    pub fn all() -> &'static [JobType] {
        &[JobType::VideoProcessing]
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobType {
    type Err = UnknownJobType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownJobType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_tag() {
        assert_eq!(JobType::VideoProcessing.as_str(), "video-processing");
        assert_eq!(
            "video-processing".parse::<JobType>().unwrap(),
            JobType::VideoProcessing
        );
        assert_eq!(
            "thumbnail".parse::<JobType>(),
            Err(UnknownJobType("thumbnail".to_string()))
        );
    }

    #[test]
    fn test_job_type_serde_matches_tag() {
        let json = serde_json::to_string(&JobType::VideoProcessing).unwrap();
        assert_eq!(json, "\"video-processing\"");
    }
}
