//! Handler registry: maps a job type string to the handler that executes it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{QueueError, Result};
use crate::job::Job;

/// Executes jobs of one job type.
///
/// `handle` may be long-running and MUST honor `ctx` cancellation: a
/// canceled handler must abort the current attempt rather than complete it.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Stable job-type identity this handler executes.
    fn job_type(&self) -> &str;

    /// Execute the job. Returning `Err` routes the job through `Queue::fail`,
    /// which may schedule a retry.
    async fn handle(&self, ctx: CancellationToken, job: &Job) -> anyhow::Result<()>;
}

/// A frozen, read-only mapping from job type to handler.
///
/// Built up via `register` while the processor is `Idle`, then wrapped in an
/// `Arc` and shared read-only with every worker once `Processor::start`
/// spawns them.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for its `job_type`. Fails with
    /// `AlreadyRegistered` if that type already has a handler.
    pub fn register(&mut self, handler: Arc<dyn Handler>) -> Result<()> {
        let job_type = handler.job_type().to_string();
        if self.handlers.contains_key(&job_type) {
            return Err(QueueError::AlreadyRegistered(job_type));
        }
        self.handlers.insert(job_type, handler);
        Ok(())
    }

    /// Look up the handler for a job type, if one is registered.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(job_type).cloned()
    }

    /// True if no handlers have been registered yet.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Number of registered job types.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}
