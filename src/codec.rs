//! Self-describing wire encoding for [`Job`](crate::job::Job).
//!
//! `Job` derives `Serialize`/`Deserialize` directly, so the codec is a thin
//! wrapper that gives the round-trip law in spec a single, testable home and
//! a place to change the wire format later without touching every call site.

use crate::error::{QueueError, Result};
use crate::job::Job;

/// Serialize a job to its JSON wire form.
pub fn encode(job: &Job) -> Result<String> {
    serde_json::to_string(job).map_err(|e| QueueError::StoreError(e.into()))
}

/// Deserialize a job from its JSON wire form.
pub fn decode(raw: &str) -> Result<Job> {
    serde_json::from_str(raw).map_err(|e| QueueError::StoreError(e.into()))
}
