//! Metrics contract that mirrors the queue's state machine.
//!
//! `MetricsSink` is the seam the core depends on; production wiring uses
//! [`FacadeMetricsSink`], a thin adapter over the `metrics` crate (paired in
//! a full deployment with `metrics-exporter-prometheus` as the scrape
//! endpoint, which lives outside this crate).

/// Observations emitted by the queue and processor. Emission MUST occur
/// after the persistence write it describes has succeeded.
pub trait MetricsSink: Send + Sync {
    /// `jobs_processed_total{type,status}` += 1.
    fn job_processed(&self, job_type: &str, status: &str);

    /// `jobs_in_queue{type}` += delta (negative to decrement).
    fn jobs_in_queue(&self, job_type: &str, delta: i64);

    /// `job_processing_duration_seconds{type}` observation.
    fn processing_duration(&self, job_type: &str, seconds: f64);

    /// `job_queue_latency_seconds{type}` observation.
    fn queue_latency(&self, job_type: &str, seconds: f64);

    /// `job_retries_total{type}` += delta.
    fn retries(&self, job_type: &str, delta: u64);

    /// `job_errors_total{type, error_kind}` += 1.
    fn error(&self, job_type: &str, error_kind: &str);

    /// `job_status_transitions_total{type, from, to}` += 1.
    fn transition(&self, job_type: &str, from: &str, to: &str);
}

/// A sink that discards every observation. Useful for tests and for callers
/// that don't want metrics wired up yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn job_processed(&self, _job_type: &str, _status: &str) {}
    fn jobs_in_queue(&self, _job_type: &str, _delta: i64) {}
    fn processing_duration(&self, _job_type: &str, _seconds: f64) {}
    fn queue_latency(&self, _job_type: &str, _seconds: f64) {}
    fn retries(&self, _job_type: &str, _delta: u64) {}
    fn error(&self, _job_type: &str, _error_kind: &str) {}
    fn transition(&self, _job_type: &str, _from: &str, _to: &str) {}
}

/// Production [`MetricsSink`] backed by the `metrics` facade crate.
///
/// Registering an exporter (e.g. `metrics-exporter-prometheus`) is the
/// embedding application's responsibility; this sink only records.
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeMetricsSink;

impl MetricsSink for FacadeMetricsSink {
    fn job_processed(&self, job_type: &str, status: &str) {
        metrics::counter!(
            "jobs_processed_total",
            "type" => job_type.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
    }

    fn jobs_in_queue(&self, job_type: &str, delta: i64) {
        let gauge = metrics::gauge!("jobs_in_queue", "type" => job_type.to_string());
        if delta >= 0 {
            gauge.increment(delta as f64);
        } else {
            gauge.decrement((-delta) as f64);
        }
    }

    fn processing_duration(&self, job_type: &str, seconds: f64) {
        metrics::histogram!(
            "job_processing_duration_seconds",
            "type" => job_type.to_string()
        )
        .record(seconds);
    }

    fn queue_latency(&self, job_type: &str, seconds: f64) {
        metrics::histogram!(
            "job_queue_latency_seconds",
            "type" => job_type.to_string()
        )
        .record(seconds);
    }

    fn retries(&self, job_type: &str, delta: u64) {
        metrics::counter!("job_retries_total", "type" => job_type.to_string()).increment(delta);
    }

    fn error(&self, job_type: &str, error_kind: &str) {
        metrics::counter!(
            "job_errors_total",
            "type" => job_type.to_string(),
            "error_kind" => error_kind.to_string()
        )
        .increment(1);
    }

    fn transition(&self, job_type: &str, from: &str, to: &str) {
        metrics::counter!(
            "job_status_transitions_total",
            "type" => job_type.to_string(),
            "from" => from.to_string(),
            "to" => to.to_string()
        )
        .increment(1);
    }
}

