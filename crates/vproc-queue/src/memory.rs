//! In-memory broker with Redis Streams delivery semantics.
//!
//! Used by tests and local runs. Delivered messages stay pending until
//! acknowledged and are redelivered once idle longer than the visibility
//! timeout, the same as the consumer group behaviour of [`JobQueue`].
//!
//! [`JobQueue`]: crate::queue::JobQueue

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::broker::{fail_outcome, Delivery, FailOutcome, JobBroker};
use crate::error::QueueResult;
use crate::job::QueueJob;

/// Upper bound on one wait inside `consume`, so idle pending messages are noticed.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A message moved to the dead letter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub message_id: String,
    pub job_type: String,
    pub payload: String,
    pub error: String,
}

#[derive(Debug, Clone)]
struct Message {
    id: String,
    job_type: String,
    payload: String,
}

#[derive(Debug)]
struct Pending {
    message: Message,
    consumer: String,
    delivered_at: Instant,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    ready: VecDeque<Message>,
    pending: Vec<Pending>,
    failures: HashMap<String, u32>,
    dead: Vec<DeadLetter>,
}

/// In-memory `JobBroker`. Clones share state.
#[derive(Debug, Clone)]
pub struct InMemoryQueue {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
    visibility_timeout: Duration,
    max_retries: u32,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration, max_retries: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            notify: Arc::new(Notify::new()),
            visibility_timeout,
            max_retries,
        }
    }

    /// Messages not yet acknowledged, delivered or not.
    pub fn len(&self) -> usize {
        let state = self.lock();
        state.ready.len() + state.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivered but unacknowledged messages.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn dlq_len(&self) -> usize {
        self.lock().dead.len()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().dead.clone()
    }

    /// Append a raw message, bypassing envelope validation.
    pub fn push_raw(&self, job_type: impl Into<String>, payload: impl Into<String>) -> String {
        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            let id = format!("{}-0", state.next_id);
            state.ready.push_back(Message {
                id: id.clone(),
                job_type: job_type.into(),
                payload: payload.into(),
            });
            id
        };
        self.notify.notify_waiters();
        id
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_take(&self, consumer: &str) -> Option<Delivery> {
        let mut state = self.lock();
        let now = Instant::now();

        if let Some(entry) = state
            .pending
            .iter_mut()
            .find(|p| now.duration_since(p.delivered_at) >= self.visibility_timeout)
        {
            let previous = std::mem::replace(&mut entry.consumer, consumer.to_string());
            entry.delivered_at = now;
            entry.deliveries += 1;
            debug!(
                "Claimed pending job {} (delivery {}) from {} for {}",
                entry.message.id, entry.deliveries, previous, consumer
            );
            return Some(delivery(&entry.message, entry.deliveries));
        }

        let message = state.ready.pop_front()?;
        let delivered = delivery(&message, 1);
        state.pending.push(Pending {
            message,
            consumer: consumer.to_string(),
            delivered_at: now,
            deliveries: 1,
        });
        Some(delivered)
    }

    fn remove_pending(state: &mut State, message_id: &str) -> Option<Pending> {
        let index = state
            .pending
            .iter()
            .position(|p| p.message.id == message_id)?;
        state.failures.remove(message_id);
        Some(state.pending.remove(index))
    }
}

#[async_trait]
impl JobBroker for InMemoryQueue {
    async fn enqueue(&self, job: &QueueJob) -> QueueResult<String> {
        let payload = job.payload()?;
        Ok(self.push_raw(job.job_type().as_str(), payload))
    }

    async fn consume(&self, consumer: &str, block: Duration) -> QueueResult<Option<Delivery>> {
        let deadline = Instant::now() + block;

        loop {
            // Registered before checking so a concurrent enqueue is not missed.
            let notified = self.notify.notified();

            if let Some(delivery) = self.try_take(consumer) {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let wait = (deadline - now).min(POLL_INTERVAL);
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.lock();
        if Self::remove_pending(&mut state, &delivery.message_id).is_none() {
            warn!("Ack for unknown message {}", delivery.message_id);
        }
        Ok(())
    }

    async fn fail(
        &self,
        delivery: &Delivery,
        error: &str,
        permanent: bool,
    ) -> QueueResult<FailOutcome> {
        let mut state = self.lock();
        let failures = {
            let count = state.failures.entry(delivery.message_id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let outcome = fail_outcome(failures, self.max_retries, permanent);
        if let FailOutcome::DeadLettered { .. } = outcome {
            Self::remove_pending(&mut state, &delivery.message_id);
            state.dead.push(DeadLetter {
                message_id: delivery.message_id.clone(),
                job_type: delivery.job_type.clone(),
                payload: delivery.payload.clone(),
                error: error.to_string(),
            });
            warn!("Moved job {} to DLQ: {}", delivery.message_id, error);
        }
        Ok(outcome)
    }
}

fn delivery(message: &Message, attempt: u32) -> Delivery {
    Delivery {
        message_id: message.id.clone(),
        job_type: message.job_type.clone(),
        payload: message.payload.clone(),
        attempt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vproc_models::VideoId;

    const NO_WAIT: Duration = Duration::from_millis(0);

    #[tokio::test]
    async fn test_enqueue_consume_ack() {
        let queue = InMemoryQueue::new(Duration::from_secs(60), 3);
        let id = queue
            .enqueue_video_processing(&VideoId::from("v1"))
            .await
            .unwrap();

        let delivery = queue.consume("w-0", NO_WAIT).await.unwrap().unwrap();
        assert_eq!(delivery.message_id, id);
        assert_eq!(delivery.job_type, "video-processing");
        assert_eq!(delivery.payload, r#"{"video_id":"v1"}"#);
        assert_eq!(delivery.attempt, 1);

        // Pending, not redelivered before the visibility timeout.
        assert!(queue.consume("w-1", NO_WAIT).await.unwrap().is_none());
        assert_eq!(queue.pending_len(), 1);

        queue.ack(&delivery).await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_blank_video_id_is_not_enqueued() {
        let queue = InMemoryQueue::new(Duration::from_secs(60), 3);
        assert!(queue
            .enqueue_video_processing(&VideoId::from(""))
            .await
            .is_err());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_redelivery_after_visibility_timeout() {
        let queue = InMemoryQueue::new(Duration::ZERO, 3);
        queue
            .enqueue_video_processing(&VideoId::from("v1"))
            .await
            .unwrap();

        let first = queue.consume("w-0", NO_WAIT).await.unwrap().unwrap();
        let second = queue.consume("w-1", NO_WAIT).await.unwrap().unwrap();
        assert_eq!(first.message_id, second.message_id);
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test]
    async fn test_fail_retries_then_dead_letters() {
        let queue = InMemoryQueue::new(Duration::ZERO, 2);
        queue
            .enqueue_video_processing(&VideoId::from("v1"))
            .await
            .unwrap();

        let delivery = queue.consume("w-0", NO_WAIT).await.unwrap().unwrap();
        assert_eq!(
            queue.fail(&delivery, "boom", false).await.unwrap(),
            FailOutcome::Retrying { failures: 1 }
        );

        let delivery = queue.consume("w-0", NO_WAIT).await.unwrap().unwrap();
        assert_eq!(
            queue.fail(&delivery, "boom", false).await.unwrap(),
            FailOutcome::DeadLettered { failures: 2 }
        );

        assert!(queue.is_empty());
        assert_eq!(queue.dead_letters()[0].error, "boom");
    }

    #[tokio::test]
    async fn test_permanent_failure_dead_letters_immediately() {
        let queue = InMemoryQueue::new(Duration::from_secs(60), 3);
        queue.push_raw("video-processing", "not json");

        let delivery = queue.consume("w-0", NO_WAIT).await.unwrap().unwrap();
        let err = delivery.decode().unwrap_err();
        let outcome = queue.fail(&delivery, &err.to_string(), true).await.unwrap();

        assert_eq!(outcome, FailOutcome::DeadLettered { failures: 1 });
        assert_eq!(queue.dlq_len(), 1);
    }

    #[tokio::test]
    async fn test_consume_wakes_on_enqueue() {
        let queue = InMemoryQueue::new(Duration::from_secs(60), 3);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.consume("w-0", Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push_raw("video-processing", r#"{"video_id":"v1"}"#);

        let delivery = consumer.await.unwrap().unwrap();
        assert!(delivery.is_some());
    }
}
