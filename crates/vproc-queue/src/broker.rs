//! Broker abstraction shared by the Redis queue and the in-memory queue.

use std::time::Duration;

use async_trait::async_trait;
use vproc_models::VideoId;

use crate::error::QueueResult;
use crate::job::{QueueJob, VideoProcessingJob};

/// One delivery of a queue message to a consumer.
///
/// The payload stays raw so a malformed message still reaches the consumer
/// and can be dead-lettered with a reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker message ID, also the job reference returned by enqueue
    pub message_id: String,
    /// Job type tag field
    pub job_type: String,
    /// JSON payload field
    pub payload: String,
    /// How many times this message has been delivered, starting at 1
    pub attempt: u32,
}

impl Delivery {
    /// Decode the envelope carried by this delivery.
    pub fn decode(&self) -> QueueResult<QueueJob> {
        QueueJob::decode(&self.job_type, &self.payload)
    }
}

/// What the broker did with a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Left pending; redelivered after the visibility timeout.
    Retrying { failures: u32 },
    /// Copied to the dead-letter stream and acknowledged.
    DeadLettered { failures: u32 },
}

/// At-least-once job broker.
#[async_trait]
pub trait JobBroker: Send + Sync {
    /// Append a job. Returns the message ID.
    async fn enqueue(&self, job: &QueueJob) -> QueueResult<String>;

    /// Wait up to `block` for one delivery.
    ///
    /// Messages left pending longer than the visibility timeout are
    /// redelivered before new messages are read.
    async fn consume(&self, consumer: &str, block: Duration) -> QueueResult<Option<Delivery>>;

    /// Acknowledge and remove a message.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Record a failed attempt and apply the retry/dead-letter policy.
    async fn fail(&self, delivery: &Delivery, error: &str, permanent: bool)
        -> QueueResult<FailOutcome>;

    /// Enqueue a video processing job for `video_id`.
    async fn enqueue_video_processing(&self, video_id: &VideoId) -> QueueResult<String> {
        let job = VideoProcessingJob::new(video_id.clone())?;
        self.enqueue(&QueueJob::from(job)).await
    }
}

/// Retry decision shared by broker implementations.
pub(crate) fn fail_outcome(failures: u32, max_retries: u32, permanent: bool) -> FailOutcome {
    if permanent || failures >= max_retries {
        FailOutcome::DeadLettered { failures }
    } else {
        FailOutcome::Retrying { failures }
    }
}
