//! Worker pool tests against the in-memory queue.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, FakeMedia, Fault, Harness};
use vproc_models::{VideoId, VideoStatus};
use vproc_queue::{InMemoryQueue, JobBroker};
use vproc_worker::{reasons, Shutdown, WorkerConfig, WorkerPool};

fn config(concurrency: usize, shutdown_timeout: Duration) -> WorkerConfig {
    WorkerConfig {
        concurrency,
        shutdown_timeout,
        poll_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

fn pool(h: &Harness, queue: &InMemoryQueue, config: WorkerConfig, shutdown: Shutdown) -> WorkerPool {
    WorkerPool::new(config, Arc::new(queue.clone()), Arc::clone(&h.executor), shutdown)
}

#[tokio::test]
async fn test_enqueued_video_is_processed_end_to_end() {
    let h = Harness::new(FakeMedia::new(45.0));
    let id = h.upload("v1");
    let queue = InMemoryQueue::new(Duration::from_secs(60), 3);
    queue.enqueue_video_processing(&id).await.unwrap();

    let pool = pool(&h, &queue, config(2, Duration::from_secs(5)), Shutdown::new());
    let handle = pool.shutdown_handle();
    let running = tokio::spawn(async move { pool.run().await });

    h.wait_for_status(&id, VideoStatus::Processed).await;
    eventually("ack", || queue.is_empty()).await;

    handle.shutdown();
    running.await.unwrap().unwrap();

    let record = h.record(&id).await;
    assert!(record
        .processed_path
        .unwrap()
        .ends_with("v1_processed.mp4"));
    assert_eq!(h.media.transcode_count(), 1);
    assert_eq!(h.work_dir_entries(), 0);
    assert_eq!(queue.dlq_len(), 0);
}

#[tokio::test]
async fn test_duplicate_envelopes_transcode_once() {
    let h = Harness::new(FakeMedia::new(10.0).with_transcode_delay(Duration::from_millis(100)));
    let id = h.upload("v1");
    let queue = InMemoryQueue::new(Duration::from_millis(200), 3);
    queue.enqueue_video_processing(&id).await.unwrap();
    queue.enqueue_video_processing(&id).await.unwrap();

    let pool = pool(&h, &queue, config(2, Duration::from_secs(5)), Shutdown::new());
    let handle = pool.shutdown_handle();
    let running = tokio::spawn(async move { pool.run().await });

    h.wait_for_status(&id, VideoStatus::Processed).await;
    // The deferred duplicate is redelivered after the visibility timeout and
    // then acknowledged as already processed.
    eventually("both deliveries acked", || queue.is_empty()).await;

    handle.shutdown();
    running.await.unwrap().unwrap();

    assert_eq!(h.media.transcode_count(), 1);
    assert_eq!(queue.dlq_len(), 0);
}

#[tokio::test]
async fn test_failed_job_is_not_retried_after_terminal_failure() {
    let h = Harness::new(FakeMedia::new(10.0).with_fault(Fault::Transcode));
    let id = h.upload("v2");
    let queue = InMemoryQueue::new(Duration::from_millis(50), 3);
    queue.enqueue_video_processing(&id).await.unwrap();

    let pool = pool(&h, &queue, config(1, Duration::from_secs(5)), Shutdown::new());
    let handle = pool.shutdown_handle();
    let running = tokio::spawn(async move { pool.run().await });

    h.wait_for_status(&id, VideoStatus::Failed).await;
    eventually("redelivery acked", || queue.is_empty()).await;

    handle.shutdown();
    running.await.unwrap().unwrap();

    assert_eq!(
        h.record(&id).await.failure_reason.as_deref(),
        Some(reasons::TRANSCODE_FAILED)
    );
    assert_eq!(h.media.transcode_count(), 1);
    assert_eq!(queue.dlq_len(), 0);
}

#[tokio::test]
async fn test_malformed_envelopes_are_dead_lettered() {
    let h = Harness::new(FakeMedia::new(10.0));
    let queue = InMemoryQueue::new(Duration::from_secs(60), 3);
    queue.push_raw("video-processing", "not json");
    queue.push_raw("thumbnail", r#"{"video_id":"v1"}"#);
    queue.push_raw("video-processing", r#"{"video_id":"  "}"#);

    let pool = pool(&h, &queue, config(1, Duration::from_secs(5)), Shutdown::new());
    let handle = pool.shutdown_handle();
    let running = tokio::spawn(async move { pool.run().await });

    eventually("dead letters", || queue.dlq_len() == 3).await;

    handle.shutdown();
    running.await.unwrap().unwrap();

    assert!(queue.is_empty());
    assert!(h.media.calls().is_empty());
    assert!(queue
        .dead_letters()
        .iter()
        .all(|dead| dead.error.starts_with("Invalid job payload")));
}

#[tokio::test]
async fn test_unknown_video_is_dead_lettered() {
    let h = Harness::new(FakeMedia::new(10.0));
    let queue = InMemoryQueue::new(Duration::from_secs(60), 3);
    queue
        .enqueue_video_processing(&VideoId::from("ghost"))
        .await
        .unwrap();

    let pool = pool(&h, &queue, config(1, Duration::from_secs(5)), Shutdown::new());
    let handle = pool.shutdown_handle();
    let running = tokio::spawn(async move { pool.run().await });

    eventually("dead letter", || queue.dlq_len() == 1).await;

    handle.shutdown();
    running.await.unwrap().unwrap();

    assert!(queue.is_empty());
    assert!(h.media.calls().is_empty());
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_job() {
    let h = Harness::new(FakeMedia::new(10.0).with_transcode_delay(Duration::from_millis(200)));
    let id = h.upload("v3");
    let queue = InMemoryQueue::new(Duration::from_secs(60), 3);
    queue.enqueue_video_processing(&id).await.unwrap();

    let pool = pool(&h, &queue, config(1, Duration::from_secs(5)), Shutdown::new());
    let handle = pool.shutdown_handle();
    let running = tokio::spawn(async move { pool.run().await });

    let media = Arc::clone(&h.media);
    eventually("transcode started", || media.transcode_count() == 1).await;
    handle.shutdown();
    running.await.unwrap().unwrap();

    assert_eq!(h.status(&id).await, VideoStatus::Processed);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_shutdown_timeout_cancels_and_leaves_job_pending() {
    let shutdown = Shutdown::new();
    let h = Harness::new(
        FakeMedia::new(10.0)
            .with_transcode_delay(Duration::from_secs(30))
            .with_cancel(shutdown.abort_signal()),
    );
    let id = h.upload("v4");
    let queue = InMemoryQueue::new(Duration::from_secs(60), 3);
    queue.enqueue_video_processing(&id).await.unwrap();

    let pool = pool(&h, &queue, config(1, Duration::from_millis(100)), shutdown);
    let handle = pool.shutdown_handle();
    let running = tokio::spawn(async move { pool.run().await });

    let media = Arc::clone(&h.media);
    eventually("transcode started", || media.transcode_count() == 1).await;
    handle.shutdown();

    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("pool stops after cancelling media")
        .unwrap()
        .unwrap();

    let record = h.record(&id).await;
    assert_eq!(record.status, VideoStatus::Processing);
    assert_eq!(record.processing_since, None);
    assert_eq!(queue.pending_len(), 1);
    assert_eq!(queue.dlq_len(), 0);
}

#[tokio::test]
async fn test_idle_pool_stops_promptly() {
    let h = Harness::new(FakeMedia::new(10.0));
    let queue = InMemoryQueue::new(Duration::from_secs(60), 3);

    let pool = pool(&h, &queue, config(4, Duration::from_secs(5)), Shutdown::new());
    let handle = pool.shutdown_handle();
    handle.shutdown();

    tokio::time::timeout(Duration::from_secs(2), pool.run())
        .await
        .expect("idle pool stops")
        .unwrap();
}
