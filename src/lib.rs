//! Durable, priority-ordered job queue with a worker-pool processor.
//!
//! Producers call [`queue::Queue::enqueue`]; a [`processor::Processor`] drains
//! the queue across `num_workers` concurrent tasks, dispatching each job to
//! the [`registry::Handler`] registered for its `job_type`. State lives in a
//! [`kv::Kv`] store (Redis in production, an in-memory double for tests), so
//! the queue survives process restarts and can be shared across processes.
//!
//! ```no_run
//! use std::sync::Arc;
//! use queue_core::{clock::SystemClock, config::QueueConfig, job::Job, kv::MemoryKv};
//! use queue_core::metrics::NoopMetricsSink;
//! use queue_core::queue::Queue;
//!
//! # async fn example() -> queue_core::error::Result<()> {
//! let config = QueueConfig::builder().build();
//! let queue = Queue::new(
//!     Arc::new(MemoryKv::new()),
//!     Arc::new(SystemClock),
//!     Arc::new(NoopMetricsSink),
//!     config,
//! );
//! queue
//!     .enqueue(Job::new("job-1", "send_email", b"payload".to_vec(), 0, 3, chrono::Utc::now()))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod job;
pub mod kv;
pub mod metrics;
pub mod processor;
pub mod queue;
pub mod registry;
pub mod testing;

pub use config::QueueConfig;
pub use error::{QueueError, Result};
pub use job::{Job, JobStatus};
pub use processor::{Processor, ProcessorState};
pub use queue::Queue;
pub use registry::{Handler, HandlerRegistry};
