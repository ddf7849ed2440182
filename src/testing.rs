//! Public test doubles for embedding callers and integration tests.
//!
//! Mirrors the teacher's own `testing.rs`: a grab-bag of fakes kept behind a
//! module boundary so production code never accidentally depends on them.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use crate::clock::FixedClock;

use crate::job::Job;
use crate::metrics::MetricsSink;
use crate::registry::Handler;

/// One observation recorded by [`RecordingMetricsSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    /// `job_processed(type, status)`.
    JobProcessed { job_type: String, status: String },
    /// `jobs_in_queue(type, delta)`.
    JobsInQueue { job_type: String, delta: i64 },
    /// `processing_duration(type, seconds)`.
    ProcessingDuration { job_type: String, seconds: f64 },
    /// `queue_latency(type, seconds)`.
    QueueLatency { job_type: String, seconds: f64 },
    /// `retries(type, delta)`.
    Retries { job_type: String, delta: u64 },
    /// `error(type, error_kind)`.
    Error { job_type: String, error_kind: String },
    /// `transition(type, from, to)`.
    Transition { job_type: String, from: String, to: String },
}

/// A [`MetricsSink`] that records every observation in order, for assertions
/// in tests. Never use in production: it grows without bound.
#[derive(Debug, Default)]
pub struct RecordingMetricsSink {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingMetricsSink {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot everything recorded so far, in emission order.
    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn push(&self, event: Recorded) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn job_processed(&self, job_type: &str, status: &str) {
        self.push(Recorded::JobProcessed {
            job_type: job_type.to_string(),
            status: status.to_string(),
        });
    }

    fn jobs_in_queue(&self, job_type: &str, delta: i64) {
        self.push(Recorded::JobsInQueue {
            job_type: job_type.to_string(),
            delta,
        });
    }

    fn processing_duration(&self, job_type: &str, seconds: f64) {
        self.push(Recorded::ProcessingDuration {
            job_type: job_type.to_string(),
            seconds,
        });
    }

    fn queue_latency(&self, job_type: &str, seconds: f64) {
        self.push(Recorded::QueueLatency {
            job_type: job_type.to_string(),
            seconds,
        });
    }

    fn retries(&self, job_type: &str, delta: u64) {
        self.push(Recorded::Retries {
            job_type: job_type.to_string(),
            delta,
        });
    }

    fn error(&self, job_type: &str, error_kind: &str) {
        self.push(Recorded::Error {
            job_type: job_type.to_string(),
            error_kind: error_kind.to_string(),
        });
    }

    fn transition(&self, job_type: &str, from: &str, to: &str) {
        self.push(Recorded::Transition {
            job_type: job_type.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
    }
}

/// A [`Handler`] whose behavior is scripted: record every call, and either
/// succeed, fail, or hang until canceled, as configured.
pub struct MockHandler {
    job_type: &'static str,
    invocations: Mutex<Vec<Job>>,
    should_fail: bool,
    hang_until_canceled: bool,
}

impl MockHandler {
    /// A handler for `job_type` that always succeeds.
    pub fn succeeding(job_type: &'static str) -> Arc<Self> {
        Arc::new(Self {
            job_type,
            invocations: Mutex::new(Vec::new()),
            should_fail: false,
            hang_until_canceled: false,
        })
    }

    /// A handler for `job_type` that always returns an error.
    pub fn failing(job_type: &'static str) -> Arc<Self> {
        Arc::new(Self {
            job_type,
            invocations: Mutex::new(Vec::new()),
            should_fail: true,
            hang_until_canceled: false,
        })
    }

    /// A handler for `job_type` that blocks until its `ctx` is canceled, then
    /// returns an error (simulating an aborted attempt).
    pub fn hanging(job_type: &'static str) -> Arc<Self> {
        Arc::new(Self {
            job_type,
            invocations: Mutex::new(Vec::new()),
            should_fail: true,
            hang_until_canceled: true,
        })
    }

    /// Jobs this handler has been invoked with, in call order.
    pub fn invocations(&self) -> Vec<Job> {
        self.invocations.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of times this handler has been invoked.
    pub fn call_count(&self) -> usize {
        self.invocations.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Handler for MockHandler {
    fn job_type(&self) -> &str {
        self.job_type
    }

    async fn handle(&self, ctx: CancellationToken, job: &Job) -> anyhow::Result<()> {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job.clone());

        if self.hang_until_canceled {
            ctx.cancelled().await;
            anyhow::bail!("canceled before completion");
        }
        if self.should_fail {
            anyhow::bail!("synthetic handler failure");
        }
        Ok(())
    }
}
