//! Job queue using Redis Streams.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};
use vproc_models::VideoId;

use crate::broker::{fail_outcome, Delivery, FailOutcome, JobBroker};
use crate::error::{QueueError, QueueResult};
use crate::job::{QueueJob, VideoProcessingJob};

/// Stream field holding the job type tag.
const TYPE_FIELD: &str = "type";
/// Stream field holding the JSON payload.
const PAYLOAD_FIELD: &str = "payload";
/// TTL of per-message failure counters.
const RETRY_KEY_TTL_SECS: i64 = 86400;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Failed attempts before DLQ
    pub max_retries: u32,
    /// Idle time after which a pending message is redelivered
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "vproc:jobs".to_string(),
            consumer_group: "vproc:workers".to_string(),
            dlq_stream_name: "vproc:dlq".to_string(),
            max_retries: 3,
            visibility_timeout: Duration::from_secs(600), // 10 minutes
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            visibility_timeout: std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
        }
    }
}

/// Job queue client.
#[derive(Clone)]
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        // Start at 0 so messages enqueued before the first worker are not skipped.
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue a video processing job. Returns the message ID.
    pub async fn enqueue_video_processing(&self, video_id: &VideoId) -> QueueResult<String> {
        let job = VideoProcessingJob::new(video_id.clone())?;
        self.enqueue_job(&QueueJob::from(job)).await
    }

    async fn enqueue_job(&self, job: &QueueJob) -> QueueResult<String> {
        let payload = job.payload()?;
        let mut conn = self.conn().await?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg(TYPE_FIELD)
            .arg(job.job_type().as_str())
            .arg(PAYLOAD_FIELD)
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        info!(
            "Enqueued {} job for video {} with message ID {}",
            job.job_type(),
            job.video_id(),
            message_id
        );

        Ok(message_id)
    }

    /// Acknowledge a message and delete it from the stream.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        conn.del::<_, ()>(self.retry_key(message_id)).await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Copy a delivery to the dead letter stream and acknowledge it.
    pub async fn dlq(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg(TYPE_FIELD)
            .arg(&delivery.job_type)
            .arg(PAYLOAD_FIELD)
            .arg(&delivery.payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(&delivery.message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(&delivery.message_id).await?;

        warn!("Moved job {} to DLQ: {}", delivery.message_id, error);
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Take over the oldest message idle longer than the visibility timeout.
    ///
    /// This handles jobs from crashed workers and jobs left pending after a
    /// retryable failure.
    pub async fn claim_pending(&self, consumer_name: &str) -> QueueResult<Option<Delivery>> {
        let mut conn = self.conn().await?;
        let min_idle_ms = self.min_idle_ms();

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        let Some(candidate) = pending.ids.into_iter().next() else {
            return Ok(None);
        };

        // XCLAIM re-checks the idle time, so only one consumer wins the race.
        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg(&candidate.id)
            .query_async(&mut conn)
            .await?;

        let Some(entry) = claimed.ids.into_iter().next() else {
            return Ok(None);
        };

        let attempt = u32::try_from(candidate.times_delivered)
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        info!(
            "Claimed pending job {} (delivery {}) for {}",
            entry.id, attempt, consumer_name
        );
        Ok(Some(delivery_from_entry(&entry, attempt)))
    }

    /// Read one new message for `consumer_name`, blocking up to `block`.
    pub async fn read_new(
        &self,
        consumer_name: &str,
        block: Duration,
    ) -> QueueResult<Option<Delivery>> {
        let mut conn = self.conn().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            // BLOCK 0 waits forever.
            .arg(u64::try_from(block.as_millis()).unwrap_or(u64::MAX).max(1))
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let delivery = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|key| key.ids)
            .next()
            .map(|entry| delivery_from_entry(&entry, 1));

        if let Some(delivery) = &delivery {
            debug!("Consumed job {} from stream", delivery.message_id);
        }
        Ok(delivery)
    }

    /// Increment the failure count of a message.
    pub async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.conn().await?;

        let key = self.retry_key(message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, RETRY_KEY_TTL_SECS).await?;
        Ok(count)
    }

    /// Get the failure count of a message.
    pub async fn get_retry_count(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.conn().await?;
        let count: Option<u32> = conn.get(self.retry_key(message_id)).await?;
        Ok(count.unwrap_or(0))
    }

    /// Get max retries from config.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    fn retry_key(&self, message_id: &str) -> String {
        format!("{}:retry:{}", self.config.stream_name, message_id)
    }

    fn min_idle_ms(&self) -> u64 {
        u64::try_from(self.config.visibility_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

#[async_trait]
impl JobBroker for JobQueue {
    async fn enqueue(&self, job: &QueueJob) -> QueueResult<String> {
        self.enqueue_job(job).await
    }

    async fn consume(&self, consumer: &str, block: Duration) -> QueueResult<Option<Delivery>> {
        if let Some(delivery) = self.claim_pending(consumer).await? {
            return Ok(Some(delivery));
        }
        self.read_new(consumer, block).await
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        JobQueue::ack(self, &delivery.message_id).await
    }

    async fn fail(
        &self,
        delivery: &Delivery,
        error: &str,
        permanent: bool,
    ) -> QueueResult<FailOutcome> {
        let failures = self.increment_retry(&delivery.message_id).await?;
        let outcome = fail_outcome(failures, self.config.max_retries, permanent);

        match outcome {
            FailOutcome::DeadLettered { .. } => self.dlq(delivery, error).await?,
            FailOutcome::Retrying { failures } => warn!(
                "Job {} failed (attempt {}/{}), will be redelivered: {}",
                delivery.message_id, failures, self.config.max_retries, error
            ),
        }
        Ok(outcome)
    }
}

fn delivery_from_entry(entry: &StreamId, attempt: u32) -> Delivery {
    Delivery {
        message_id: entry.id.clone(),
        job_type: entry.get(TYPE_FIELD).unwrap_or_default(),
        payload: entry.get(PAYLOAD_FIELD).unwrap_or_default(),
        attempt,
    }
}
