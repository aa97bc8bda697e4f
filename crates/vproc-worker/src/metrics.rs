//! Worker metrics.
//!
//! Counters and histograms for job outcomes and pipeline stages, exported
//! through an optional Prometheus listener.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    /// Finished jobs by outcome.
    pub const JOBS_TOTAL: &str = "vproc_jobs_total";

    /// Failed jobs by error kind.
    pub const JOBS_FAILED_TOTAL: &str = "vproc_jobs_failed_total";

    /// Jobs moved to the dead letter stream.
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "vproc_jobs_dead_lettered_total";

    /// Jobs currently running.
    pub const JOBS_IN_FLIGHT: &str = "vproc_jobs_in_flight";

    /// End-to-end job duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "vproc_job_duration_seconds";

    /// Media operation duration in seconds by stage and result.
    pub const MEDIA_DURATION_SECONDS: &str = "vproc_media_duration_seconds";
}

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// Must be called from within the tokio runtime.
pub fn install_prometheus(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics listener on {addr}: {e}")))
}

/// Record a finished job.
pub fn record_job(outcome: &'static str, duration_secs: f64) {
    counter!(names::JOBS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => outcome).record(duration_secs);
}

/// Record a failed job by error kind.
pub fn record_failure(kind: &'static str) {
    counter!(names::JOBS_FAILED_TOTAL, "kind" => kind).increment(1);
}

pub fn record_dead_letter() {
    counter!(names::JOBS_DEAD_LETTERED_TOTAL).increment(1);
}

/// Record one media operation.
pub fn record_media(stage: &'static str, success: bool, duration_secs: f64) {
    let result = if success { "ok" } else { "error" };
    histogram!(
        names::MEDIA_DURATION_SECONDS,
        "stage" => stage,
        "result" => result
    )
    .record(duration_secs);
}

/// Tracks one running job in the in-flight gauge until dropped.
pub struct InFlightGuard(());

impl InFlightGuard {
    pub fn new() -> Self {
        gauge!(names::JOBS_IN_FLIGHT).increment(1.0);
        Self(())
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(names::JOBS_IN_FLIGHT).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::JOBS_TOTAL.starts_with("vproc_"));
        assert!(names::JOB_DURATION_SECONDS.ends_with("_seconds"));
        assert!(names::MEDIA_DURATION_SECONDS.contains("media"));
    }

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed: recording is a no-op.
        record_job("processed", 1.5);
        record_media("transcode", true, 0.2);
        drop(InFlightGuard::new());
    }
}
