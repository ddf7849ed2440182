//! Error types for the job queue and processor.

use thiserror::Error;

/// Errors surfaced by queue operations and the processor.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Job id not present in the store.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Operation not legal in the job's current status.
    #[error("illegal state for job {id}: {reason}")]
    IllegalState {
        /// Job id the operation targeted.
        id: String,
        /// Why the transition was rejected.
        reason: String,
    },

    /// A handler was already registered for this job type.
    #[error("handler already registered for job type: {0}")]
    AlreadyRegistered(String),

    /// `Processor::start` called with an empty handler registry.
    #[error("processor has no registered handlers")]
    NoHandlers,

    /// `Processor::start` called from a non-`Idle` state.
    #[error("processor already started")]
    AlreadyStarted,

    /// Workers did not drain within `shutdown_wait`.
    #[error("shutdown timed out waiting for workers to drain")]
    ShutdownTimeout,

    /// Enqueue rejected because the payload exceeded `max_payload_size`.
    #[error("payload of {size} bytes exceeds max of {max} bytes")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Dequeued job has no registered handler.
    #[error("no handler registered for job type: {0}")]
    UnknownType(String),

    /// The underlying KV store faulted.
    #[error("store error: {0}")]
    StoreError(#[from] anyhow::Error),

    /// A handler returned an error while executing a job.
    #[error("handler error: {0}")]
    HandlerError(String),
}

impl QueueError {
    /// Short machine-readable tag for this variant, suitable as a metrics
    /// `error_kind` label.
    pub fn kind(&self) -> &'static str {
        match self {
            QueueError::NotFound(_) => "not_found",
            QueueError::IllegalState { .. } => "illegal_state",
            QueueError::AlreadyRegistered(_) => "already_registered",
            QueueError::NoHandlers => "no_handlers",
            QueueError::AlreadyStarted => "already_started",
            QueueError::ShutdownTimeout => "shutdown_timeout",
            QueueError::PayloadTooLarge { .. } => "payload_too_large",
            QueueError::UnknownType(_) => "unknown_type",
            QueueError::StoreError(_) => "store_error",
            QueueError::HandlerError(_) => "handler_error",
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_match_metrics_labels_in_use_elsewhere() {
        assert_eq!(QueueError::UnknownType("x".to_string()).kind(), "unknown_type");
        assert_eq!(QueueError::HandlerError("boom".to_string()).kind(), "handler_error");
        assert_eq!(QueueError::StoreError(anyhow::anyhow!("down")).kind(), "store_error");
    }
}
