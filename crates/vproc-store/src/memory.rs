//! In-memory status store for tests and local runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use vproc_models::{VideoAccess, VideoId, VideoRecord, VideoStatus};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_rejected_transition;
use crate::repo::{lease_is_fresh, ProcessingClaim, VideoStatusStore, DEFAULT_PROCESSING_LEASE};

/// `VideoStatusStore` backed by a shared map. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryVideoStore {
    records: Arc<Mutex<HashMap<VideoId, VideoRecord>>>,
    lease: Duration,
}

impl Default for MemoryVideoStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryVideoStore {
    pub fn new() -> Self {
        Self::with_lease(DEFAULT_PROCESSING_LEASE)
    }

    /// Create with a custom processing lease. Zero makes every lease stale.
    pub fn with_lease(lease: Duration) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            lease,
        }
    }

    /// Insert a new record.
    pub fn create(&self, record: VideoRecord) -> StoreResult<()> {
        let mut records = self.lock();
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id.to_string()));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<VideoId, VideoRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition<F>(
        &self,
        id: &VideoId,
        operation: &'static str,
        to: VideoStatus,
        apply: F,
    ) -> StoreResult<()>
    where
        F: FnOnce(&mut VideoRecord),
    {
        let mut records = self.lock();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(id.as_str()))?;

        if !record.status.can_transition_to(to) {
            record_rejected_transition(operation, record.status.as_str());
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: record.status,
                to,
            });
        }

        apply(record);
        record.status = to;
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl VideoStatusStore for MemoryVideoStore {
    async fn get(&self, id: &VideoId, access: VideoAccess) -> StoreResult<Option<VideoRecord>> {
        Ok(self
            .lock()
            .get(id)
            .filter(|record| record.is_visible_to(&access))
            .cloned())
    }

    async fn mark_processing(&self, id: &VideoId) -> StoreResult<ProcessingClaim> {
        let mut records = self.lock();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(id.as_str()))?;
        let now = Utc::now();

        let claim = match record.status {
            VideoStatus::Processed => ProcessingClaim::AlreadyProcessed,
            VideoStatus::Failed => ProcessingClaim::AlreadyFailed,
            VideoStatus::Processing if lease_is_fresh(record.processing_since, now, self.lease) => {
                ProcessingClaim::InFlight {
                    since: record.processing_since.unwrap_or(now),
                }
            }
            VideoStatus::Uploaded | VideoStatus::Processing => {
                record.status = VideoStatus::Processing;
                record.processing_since = Some(now);
                record.updated_at = now;
                ProcessingClaim::Claimed
            }
        };

        if !claim.is_claimed() {
            record_rejected_transition("mark_processing", record.status.as_str());
        }
        debug!(video_id = %id, ?claim, "mark_processing");
        Ok(claim)
    }

    async fn mark_processed(&self, id: &VideoId, processed_path: &str) -> StoreResult<()> {
        self.transition(id, "mark_processed", VideoStatus::Processed, |record| {
            record.processed_path = Some(processed_path.to_string());
            record.processing_since = None;
        })
    }

    async fn mark_failed(&self, id: &VideoId, reason: &str) -> StoreResult<()> {
        self.transition(id, "mark_failed", VideoStatus::Failed, |record| {
            record.failure_reason = Some(reason.to_string());
            record.processing_since = None;
        })
    }

    async fn release_claim(&self, id: &VideoId) -> StoreResult<()> {
        let mut records = self.lock();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(id.as_str()))?;

        if record.status == VideoStatus::Processing {
            record.processing_since = None;
            record.updated_at = Utc::now();
        }
        Ok(())
    }
}
