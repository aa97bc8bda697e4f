//! Worker pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use vproc_queue::{Delivery, FailOutcome, JobBroker, QueueJob};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics::{record_dead_letter, record_failure, record_job, InFlightGuard};
use crate::pipeline::PipelineExecutor;

/// Back-off after a broker error.
const BROKER_BACKOFF: Duration = Duration::from_secs(5);

/// How long aborted media operations get to unwind before tasks are dropped.
const ABORT_GRACE: Duration = Duration::from_secs(5);

/// Two-phase shutdown signal.
///
/// `drain` stops workers from taking new deliveries. `abort` cancels the
/// media operations of jobs still running once the drain period is over.
#[derive(Clone)]
pub struct Shutdown {
    drain: Arc<watch::Sender<bool>>,
    abort: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (drain, _) = watch::channel(false);
        let (abort, _) = watch::channel(false);
        Self {
            drain: Arc::new(drain),
            abort: Arc::new(abort),
        }
    }

    /// Receiver that flips to `true` when running media operations must stop.
    pub fn abort_signal(&self) -> watch::Receiver<bool> {
        self.abort.subscribe()
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            drain: Arc::clone(&self.drain),
        }
    }

    pub fn is_draining(&self) -> bool {
        *self.drain.borrow()
    }

    fn drain_signal(&self) -> watch::Receiver<bool> {
        self.drain.subscribe()
    }

    fn abort(&self) {
        self.abort.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable trigger for a graceful shutdown.
#[derive(Clone)]
pub struct ShutdownHandle {
    drain: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Stop taking new jobs. Idempotent.
    pub fn shutdown(&self) {
        self.drain.send_replace(true);
    }
}

/// Fixed-size pool of workers, each running one job at a time.
pub struct WorkerPool {
    config: WorkerConfig,
    broker: Arc<dyn JobBroker>,
    executor: Arc<PipelineExecutor>,
    shutdown: Shutdown,
    name: String,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        broker: Arc<dyn JobBroker>,
        executor: Arc<PipelineExecutor>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            config,
            broker,
            executor,
            shutdown,
            name: format!("worker-{}", Uuid::new_v4()),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.handle()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run until shutdown is requested and the workers have stopped.
    ///
    /// In-flight jobs get `shutdown_timeout` to finish. After that their
    /// media operations are cancelled and their deliveries stay pending.
    pub async fn run(&self) -> WorkerResult<()> {
        self.config.validate()?;

        info!(
            "Starting worker pool '{}' with {} workers",
            self.name, self.config.concurrency
        );

        let mut workers = JoinSet::new();
        for i in 0..self.config.concurrency {
            let worker = Worker {
                consumer: format!("{}-{}", self.name, i),
                broker: Arc::clone(&self.broker),
                executor: Arc::clone(&self.executor),
                poll_interval: self.config.poll_interval,
                drain: self.shutdown.drain_signal(),
            };
            workers.spawn(worker.run());
        }

        drained(&mut self.shutdown.drain_signal()).await;
        info!("Shutdown requested, waiting for in-flight jobs to complete...");

        if tokio::time::timeout(self.config.shutdown_timeout, join_workers(&mut workers))
            .await
            .is_err()
        {
            warn!(
                "Workers still busy after {:?}, cancelling media operations",
                self.config.shutdown_timeout
            );
            self.shutdown.abort();

            if tokio::time::timeout(ABORT_GRACE, join_workers(&mut workers))
                .await
                .is_err()
            {
                error!("Workers did not stop after cancellation, aborting tasks");
                workers.abort_all();
                join_workers(&mut workers).await;
            }
        }

        info!("Worker pool '{}' stopped", self.name);
        Ok(())
    }
}

async fn join_workers(workers: &mut JoinSet<()>) {
    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            if e.is_panic() {
                error!("Worker task panicked: {}", e);
            }
        }
    }
}

/// Resolves once the drain flag is set or the sender is gone.
async fn drained(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|draining| *draining).await;
}

struct Worker {
    consumer: String,
    broker: Arc<dyn JobBroker>,
    executor: Arc<PipelineExecutor>,
    poll_interval: Duration,
    drain: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        debug!(consumer = %self.consumer, "Worker started");

        loop {
            if *self.drain.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = drained(&mut self.drain) => break,
                result = self.broker.consume(&self.consumer, self.poll_interval) => result,
            };

            match next {
                Ok(Some(delivery)) => self.handle(delivery).await,
                Ok(None) => {}
                Err(e) => {
                    error!(consumer = %self.consumer, "Error consuming jobs: {}", e);
                    tokio::select! {
                        _ = drained(&mut self.drain) => break,
                        _ = tokio::time::sleep(BROKER_BACKOFF) => {}
                    }
                }
            }
        }

        debug!(consumer = %self.consumer, "Worker stopped");
    }

    /// Run one delivery to completion and settle it with the broker.
    async fn handle(&self, delivery: Delivery) {
        let job = match delivery.decode() {
            Ok(job) => job,
            Err(e) => {
                warn!(
                    job_id = %delivery.message_id,
                    job_type = %delivery.job_type,
                    "Undecodable job: {}", e
                );
                record_failure("payload");
                self.fail(&delivery, &WorkerError::Payload(e.to_string()))
                    .await;
                return;
            }
        };

        let logger = JobLogger::new(&delivery.message_id, job.video_id(), job.job_type().as_str());
        logger.log_start(delivery.attempt);

        let _in_flight = InFlightGuard::new();
        let start = Instant::now();

        // Spawned so a panic in one job cannot take the worker down.
        let executor = Arc::clone(&self.executor);
        let task_logger = logger.clone();
        let span = logger.create_span();
        let result = tokio::spawn(
            async move {
                match job {
                    QueueJob::VideoProcessing(job) => executor.process(&job, &task_logger).await,
                }
            }
            .instrument(span),
        )
        .await
        .unwrap_or_else(|e| Err(WorkerError::Panicked(e.to_string())));

        let elapsed = start.elapsed().as_secs_f64();
        match result {
            Ok(outcome) => {
                record_job(outcome.label(), elapsed);
                if !outcome.should_ack() {
                    logger.log_progress("left pending for redelivery");
                    return;
                }
                if let Err(e) = self.broker.ack(&delivery).await {
                    logger.log_error("ack", &e.to_string());
                    return;
                }
                logger.log_completion(outcome.label());
            }
            Err(e) if e.is_cancelled() => {
                record_job("cancelled", elapsed);
                logger.log_warning("cancelled by shutdown, left pending for redelivery");
            }
            Err(e) => {
                record_job("failed", elapsed);
                record_failure(e.kind());
                logger.log_error(e.kind(), &e.to_string());
                self.fail(&delivery, &e).await;
            }
        }
    }

    async fn fail(&self, delivery: &Delivery, error: &WorkerError) {
        match self
            .broker
            .fail(delivery, &error.to_string(), error.is_permanent())
            .await
        {
            Ok(FailOutcome::Retrying { failures }) => {
                info!(
                    job_id = %delivery.message_id,
                    failures,
                    "Job will be redelivered"
                );
            }
            Ok(FailOutcome::DeadLettered { failures }) => {
                record_dead_letter();
                warn!(
                    job_id = %delivery.message_id,
                    failures,
                    "Job moved to dead letter queue"
                );
            }
            Err(e) => {
                error!(
                    job_id = %delivery.message_id,
                    "Failed to record job failure: {}", e
                );
            }
        }
    }
}
