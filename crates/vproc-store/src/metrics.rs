//! Status store metrics.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Store operations by operation and result.
    pub const OPERATIONS_TOTAL: &str = "vproc_store_operations_total";

    /// Store operation latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "vproc_store_latency_seconds";

    /// Transitions rejected by the compare-and-set guard.
    pub const REJECTED_TRANSITIONS_TOTAL: &str = "vproc_store_rejected_transitions_total";
}

/// Record a completed store operation.
pub fn record_operation(operation: &'static str, success: bool, latency_ms: f64) {
    let result = if success { "ok" } else { "error" };

    counter!(
        names::OPERATIONS_TOTAL,
        "operation" => operation,
        "result" => result
    )
    .increment(1);

    histogram!(names::LATENCY_SECONDS, "operation" => operation).record(latency_ms / 1000.0);
}

/// Record a transition refused because of the current status.
pub fn record_rejected_transition(operation: &'static str, current: &'static str) {
    counter!(
        names::REJECTED_TRANSITIONS_TOTAL,
        "operation" => operation,
        "current" => current
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::OPERATIONS_TOTAL.starts_with("vproc_store_"));
        assert!(names::LATENCY_SECONDS.ends_with("_seconds"));
    }
}
