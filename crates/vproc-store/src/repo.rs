//! Status store contract.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vproc_models::{VideoAccess, VideoId, VideoRecord, VideoStatus};

use crate::error::StoreResult;

/// Default time a processing claim is honoured before another delivery may take it over.
pub const DEFAULT_PROCESSING_LEASE: Duration = Duration::from_secs(3600);

/// Result of trying to move a video into `processing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingClaim {
    /// The caller now owns the record.
    Claimed,
    /// Already `processed`; nothing to do.
    AlreadyProcessed,
    /// Already `failed`; nothing to do.
    AlreadyFailed,
    /// Another delivery holds an unexpired lease taken at `since`.
    InFlight { since: DateTime<Utc> },
}

impl ProcessingClaim {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ProcessingClaim::Claimed)
    }

    /// Terminal status behind the claim, if any.
    pub fn terminal_status(&self) -> Option<VideoStatus> {
        match self {
            ProcessingClaim::AlreadyProcessed => Some(VideoStatus::Processed),
            ProcessingClaim::AlreadyFailed => Some(VideoStatus::Failed),
            _ => None,
        }
    }
}

/// Status transitions and reads the pipeline performs against video records.
///
/// Every transition is a compare-and-set on the current status, so concurrent
/// deliveries of the same video cannot move a record backwards or overwrite a
/// terminal state.
#[async_trait]
pub trait VideoStatusStore: Send + Sync {
    /// Read a record. `VideoAccess::Owner` hides records owned by someone else.
    async fn get(&self, id: &VideoId, access: VideoAccess) -> StoreResult<Option<VideoRecord>>;

    /// Claim a record for processing.
    ///
    /// Succeeds from `uploaded`, or from `processing` when the previous lease
    /// is missing or expired. Fails with `NotFound` when the record is missing.
    async fn mark_processing(&self, id: &VideoId) -> StoreResult<ProcessingClaim>;

    /// Move a `processing` record to `processed`, recording the asset path.
    async fn mark_processed(&self, id: &VideoId, processed_path: &str) -> StoreResult<()>;

    /// Move a non-terminal record to `failed`, recording the reason.
    async fn mark_failed(&self, id: &VideoId, reason: &str) -> StoreResult<()>;

    /// Drop the processing lease so the next delivery can claim the record.
    ///
    /// A no-op unless the record is `processing`.
    async fn release_claim(&self, id: &VideoId) -> StoreResult<()>;
}

/// Whether a lease taken at `since` is still honoured at `now`.
pub(crate) fn lease_is_fresh(
    since: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    lease: Duration,
) -> bool {
    let Some(since) = since else {
        return false;
    };
    let lease = chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(36_500));
    now.signed_duration_since(since) < lease
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_freshness() {
        let now = Utc::now();
        let lease = Duration::from_secs(60);

        assert!(!lease_is_fresh(None, now, lease));
        assert!(lease_is_fresh(Some(now - chrono::Duration::seconds(10)), now, lease));
        assert!(!lease_is_fresh(Some(now - chrono::Duration::seconds(61)), now, lease));
        assert!(!lease_is_fresh(Some(now), now, Duration::ZERO));
    }

    #[test]
    fn test_terminal_status() {
        assert_eq!(
            ProcessingClaim::AlreadyProcessed.terminal_status(),
            Some(VideoStatus::Processed)
        );
        assert_eq!(ProcessingClaim::Claimed.terminal_status(), None);
        assert!(ProcessingClaim::Claimed.is_claimed());
    }
}
