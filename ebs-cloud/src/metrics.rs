//! Metrics for attach/detach orchestration and device assignment.
//!
//! Values are recorded through the `metrics` facade. The host process decides
//! which recorder (e.g. a Prometheus exporter) receives them.

use std::time::Instant;

use metrics::{counter, gauge, histogram};

/// Metric names
pub mod names {
    /// Counter: Total cloud operations by type and status
    pub const OPERATIONS_TOTAL: &str = "ebs_attach_operations_total";
    /// Histogram: Duration of cloud operations in seconds
    pub const OPERATION_DURATION_SECONDS: &str = "ebs_attach_operation_duration_seconds";
    /// Gauge: Device paths reserved but not yet released, across all nodes
    pub const INFLIGHT_ATTACHMENTS: &str = "ebs_inflight_attachments";
    /// Counter: Releases rejected by the device manager, by reason
    pub const RELEASE_CONFLICTS_TOTAL: &str = "ebs_release_conflicts_total";
    /// Counter: Reservations rejected because a node ran out of device names
    pub const DEVICE_EXHAUSTED_TOTAL: &str = "ebs_device_exhausted_total";
    /// Counter: Polls made while waiting for an attachment state
    pub const ATTACHMENT_WAIT_POLLS_TOTAL: &str = "ebs_attachment_wait_polls_total";
}

/// Record a cloud operation with its result
pub fn record_operation(operation: &str, status: &str, duration_secs: f64) {
    counter!(names::OPERATIONS_TOTAL, "operation" => operation.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!(names::OPERATION_DURATION_SECONDS, "operation" => operation.to_string())
        .record(duration_secs);
}

/// Set the number of in-flight device reservations
pub fn set_inflight_attachments(count: usize) {
    gauge!(names::INFLIGHT_ATTACHMENTS).set(count as f64);
}

/// Record a rejected release
pub fn record_release_conflict(reason: &str) {
    counter!(names::RELEASE_CONFLICTS_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// Record a node running out of device names
pub fn record_devices_exhausted() {
    counter!(names::DEVICE_EXHAUSTED_TOTAL).increment(1);
}

/// Record one poll of the attachment state
pub fn record_attachment_poll(expected_state: &str) {
    counter!(names::ATTACHMENT_WAIT_POLLS_TOTAL, "state" => expected_state.to_string()).increment(1);
}

/// Helper for timing operations
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    /// Start timing an operation
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    /// Complete the operation with success
    pub fn success(self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(&self.operation, "success", duration);
    }

    /// Complete the operation with failure
    pub fn failure(self, error_code: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(&self.operation, error_code, duration);
    }

    /// Complete the operation according to `result`
    pub fn finish<T, E>(self, result: &Result<T, E>, error_code: impl FnOnce(&E) -> &'static str) {
        match result {
            Ok(_) => self.success(),
            Err(e) => self.failure(error_code(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use metrics_exporter_prometheus::PrometheusBuilder;

    use super::*;

    #[test]
    fn test_operation_timer_records() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            OperationTimer::new("attach_disk").success();
            OperationTimer::new("attach_disk").failure("timeout");
        });

        let rendered = handle.render();
        assert!(rendered.contains(names::OPERATIONS_TOTAL));
        assert!(rendered.contains("status=\"success\""));
        assert!(rendered.contains("status=\"timeout\""));
    }

    #[test]
    fn test_release_conflict_counter() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_release_conflict("not_in_progress");
            set_inflight_attachments(3);
        });

        let rendered = handle.render();
        assert!(rendered.contains("ebs_release_conflicts_total{reason=\"not_in_progress\"} 1"));
        assert!(rendered.contains("ebs_inflight_attachments 3"));
    }
}
