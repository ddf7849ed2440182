//! Worker-pool processor: drives the queue's `dequeue -> handle -> complete|fail`
//! loop across `num_workers` concurrent tasks.
//!
//! Lifecycle is one-way (`Idle -> Running -> Stopping -> Stopped`), modeled as
//! an atomic rather than the teacher's `ArcSwap<JobStatus>` since the states
//! here fit in a byte and never carry payload.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::queue::Queue;
use crate::registry::{Handler, HandlerRegistry};

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPING: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// Lifecycle state of a [`Processor`]. Transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// No workers running; handlers can still be registered.
    Idle,
    /// Workers are dequeuing and executing jobs.
    Running,
    /// `stop` has been called; workers are draining in-flight jobs.
    Stopping,
    /// All workers have exited.
    Stopped,
}

impl From<u8> for ProcessorState {
    fn from(value: u8) -> Self {
        match value {
            STATE_IDLE => ProcessorState::Idle,
            STATE_RUNNING => ProcessorState::Running,
            STATE_STOPPING => ProcessorState::Stopping,
            _ => ProcessorState::Stopped,
        }
    }
}

/// Owns the worker pool that drains a [`Queue`] against a [`HandlerRegistry`].
pub struct Processor {
    queue: Queue,
    config: QueueConfig,
    state: AtomicU8,
    pending_registry: Mutex<HandlerRegistry>,
    worker_ctx: RwLock<Option<CancellationToken>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Processor {
    /// Build a processor over `queue`. Register handlers before calling
    /// [`Processor::start`].
    pub fn new(queue: Queue, config: QueueConfig) -> Self {
        Self {
            queue,
            config,
            state: AtomicU8::new(STATE_IDLE),
            pending_registry: Mutex::new(HandlerRegistry::new()),
            worker_ctx: RwLock::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessorState {
        ProcessorState::from(self.state.load(Ordering::SeqCst))
    }

    /// Register a handler. Legal only while `Idle`; returns `AlreadyStarted`
    /// otherwise, and `AlreadyRegistered` on a duplicate job type.
    pub fn register(&self, handler: Arc<dyn Handler>) -> Result<()> {
        if self.state() != ProcessorState::Idle {
            return Err(QueueError::AlreadyStarted);
        }
        let mut registry = self.pending_registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.register(handler)
    }

    /// Start the worker pool. `ctx` is the parent cancellation signal; the
    /// processor derives a child token so either an external cancellation of
    /// `ctx` or a later call to [`Processor::stop`] tears workers down.
    ///
    /// Fails with `NoHandlers` if no handler has been registered, or
    /// `AlreadyStarted` if not currently `Idle`.
    pub async fn start(&self, ctx: CancellationToken) -> Result<()> {
        if self
            .state
            .compare_exchange(STATE_IDLE, STATE_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(QueueError::AlreadyStarted);
        }

        let registry = {
            let mut guard = self.pending_registry.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        if registry.is_empty() {
            self.state.store(STATE_IDLE, Ordering::SeqCst);
            return Err(QueueError::NoHandlers);
        }
        let registry = Arc::new(registry);

        let worker_ctx = ctx.child_token();
        *self.worker_ctx.write().unwrap_or_else(|e| e.into_inner()) = Some(worker_ctx.clone());

        info!(num_workers = self.config.num_workers, "processor starting");

        let mut handles = Vec::with_capacity(self.config.num_workers);
        for worker_id in 0..self.config.num_workers {
            let queue = self.queue.clone();
            let registry = registry.clone();
            let worker_ctx = worker_ctx.clone();
            let poll_interval = self.config.poll_interval;
            handles.push(tokio::spawn(async move {
                run_worker(worker_id, queue, registry, worker_ctx, poll_interval).await;
            }));
        }
        *self.workers.lock().unwrap_or_else(|e| e.into_inner()) = handles;
        Ok(())
    }

    /// Signal cancellation to all workers and wait up to `shutdown_wait` for
    /// them to drain. Returns `ShutdownTimeout` if they don't finish in time;
    /// does not forcibly kill any worker. A no-op if not currently `Running`.
    pub async fn stop(&self) -> Result<()> {
        if self
            .state
            .compare_exchange(STATE_RUNNING, STATE_STOPPING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        info!("processor stopping");
        if let Some(ctx) = self.worker_ctx.read().unwrap_or_else(|e| e.into_inner()).clone() {
            ctx.cancel();
        }

        let handles = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        let drain = futures::future::join_all(handles);

        match tokio::time::timeout(self.config.shutdown_wait, drain).await {
            Ok(results) => {
                for result in results {
                    if let Err(join_err) = result {
                        error!(error = %join_err, "worker task panicked during shutdown");
                    }
                }
                self.state.store(STATE_STOPPED, Ordering::SeqCst);
                info!("processor stopped");
                Ok(())
            }
            Err(_) => {
                warn!(
                    shutdown_wait_ms = self.config.shutdown_wait.as_millis() as u64,
                    "shutdown timed out waiting for workers to drain"
                );
                Err(QueueError::ShutdownTimeout)
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    queue: Queue,
    registry: Arc<HandlerRegistry>,
    ctx: CancellationToken,
    poll_interval: Duration,
) {
    loop {
        if ctx.is_cancelled() {
            debug!(worker_id, "worker exiting on cancellation");
            return;
        }

        let job = match queue.dequeue().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::select! {
                    _ = ctx.cancelled() => return,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
                continue;
            }
            Err(e) => {
                error!(worker_id, error = %e, "dequeue failed");
                queue.metrics().error("queue", e.kind());
                tokio::select! {
                    _ = ctx.cancelled() => return,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
                continue;
            }
        };

        let Some(handler) = registry.get(&job.job_type) else {
            let unknown = QueueError::UnknownType(job.job_type.clone());
            warn!(worker_id, job_id = %job.id, job_type = %job.job_type, "no handler registered for job type");
            if let Err(e) = queue.fail(&job.id, unknown.kind(), &unknown.to_string()).await {
                error!(worker_id, job_id = %job.id, error = %e, "failed to record unknown-type failure");
            }
            continue;
        };

        let handler_ctx = ctx.child_token();
        let job_for_handler = job.clone();
        let outcome = tokio::spawn(async move { handler.handle(handler_ctx, &job_for_handler).await })
            .await;

        match outcome {
            Ok(Ok(())) => {
                if let Err(e) = queue.complete(&job.id).await {
                    error!(worker_id, job_id = %job.id, error = %e, "failed to record completion");
                }
            }
            Ok(Err(handler_err)) => {
                let wrapped = QueueError::HandlerError(handler_err.to_string());
                if let Err(e) = queue.fail(&job.id, wrapped.kind(), &wrapped.to_string()).await {
                    error!(worker_id, job_id = %job.id, error = %e, "failed to record handler failure");
                }
            }
            Err(join_err) => {
                warn!(worker_id, job_id = %job.id, error = %join_err, "handler task panicked");
                if let Err(e) = queue.fail(&job.id, "panic", &join_err.to_string()).await {
                    error!(worker_id, job_id = %job.id, error = %e, "failed to record panic failure");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::job::Job;
    use crate::kv::MemoryKv;
    use crate::metrics::NoopMetricsSink;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration as StdDuration;

    struct CountingHandler {
        job_type: &'static str,
        calls: Arc<AtomicUsize>,
        fail_first: bool,
    }

    #[async_trait]
    impl Handler for CountingHandler {
        fn job_type(&self) -> &str {
            self.job_type
        }

        async fn handle(&self, _ctx: CancellationToken, _job: &Job) -> anyhow::Result<()> {
            let prior = self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if self.fail_first && prior == 0 {
                anyhow::bail!("synthetic failure");
            }
            Ok(())
        }
    }

    fn queue() -> Queue {
        Queue::new(
            Arc::new(MemoryKv::new()),
            Arc::new(SystemClock),
            Arc::new(NoopMetricsSink),
            QueueConfig::builder()
                .poll_interval(StdDuration::from_millis(10))
                .build(),
        )
    }

    #[tokio::test]
    async fn start_without_handlers_fails() {
        let processor = Processor::new(queue(), QueueConfig::builder().build());
        let err = processor.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, QueueError::NoHandlers));
    }

    #[tokio::test]
    async fn double_start_fails() {
        let processor = Processor::new(queue(), QueueConfig::builder().build());
        let calls = Arc::new(AtomicUsize::new(0));
        processor
            .register(Arc::new(CountingHandler {
                job_type: "demo",
                calls: calls.clone(),
                fail_first: false,
            }))
            .unwrap();

        processor.start(CancellationToken::new()).await.unwrap();
        let err = processor.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, QueueError::AlreadyStarted));
        processor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn processes_enqueued_job_end_to_end() {
        let q = queue();
        let processor = Processor::new(q.clone(), QueueConfig::builder().build());
        let calls = Arc::new(AtomicUsize::new(0));
        processor
            .register(Arc::new(CountingHandler {
                job_type: "demo",
                calls: calls.clone(),
                fail_first: false,
            }))
            .unwrap();

        q.enqueue(Job::new("j1", "demo", b"payload".to_vec(), 0, 3, Utc::now()))
            .await
            .unwrap();

        processor.start(CancellationToken::new()).await.unwrap();

        let mut waited = StdDuration::ZERO;
        while calls.load(AtomicOrdering::SeqCst) == 0 && waited < StdDuration::from_secs(2) {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
            waited += StdDuration::from_millis(10);
        }

        processor.stop().await.unwrap();
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);

        let status = q.get_status("j1").await.unwrap();
        assert_eq!(status.status, crate::job::JobStatus::Completed);
    }

    #[tokio::test]
    async fn unregistered_job_type_routes_to_fail() {
        let q = queue();
        let processor = Processor::new(q.clone(), QueueConfig::builder().build());
        let calls = Arc::new(AtomicUsize::new(0));
        processor
            .register(Arc::new(CountingHandler {
                job_type: "known",
                calls,
                fail_first: false,
            }))
            .unwrap();

        q.enqueue(Job::new("j2", "mystery", b"payload".to_vec(), 0, 1, Utc::now()))
            .await
            .unwrap();

        processor.start(CancellationToken::new()).await.unwrap();

        let mut waited = StdDuration::ZERO;
        loop {
            let status = q.get_status("j2").await.unwrap();
            if status.status == crate::job::JobStatus::Failed || waited > StdDuration::from_secs(2)
            {
                assert_eq!(status.status, crate::job::JobStatus::Failed);
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
            waited += StdDuration::from_millis(10);
        }

        processor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_before_start_is_a_noop() {
        let processor = Processor::new(queue(), QueueConfig::builder().build());
        processor.stop().await.unwrap();
        assert_eq!(processor.state(), ProcessorState::Idle);
    }
}
