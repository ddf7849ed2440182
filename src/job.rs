//! Job model for durable background execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a job. Transitions are governed by [`crate::queue::Queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Eligible for dispatch (including retry-scheduled jobs not yet due).
    #[default]
    Pending,
    /// Claimed by a worker and currently executing.
    Processing,
    /// Finished successfully. Terminal.
    Completed,
    /// Exhausted retries. Terminal.
    Failed,
    /// Canceled by a producer. Terminal.
    Canceled,
}

impl JobStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

/// A unit of deferred work with identity, type, payload, and lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Opaque unique id, generated by the producer.
    pub id: String,
    /// Job-type tag; selects the handler.
    pub job_type: String,
    /// Opaque payload bytes, base64-encoded at the JSON boundary.
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
    /// Larger value = higher priority.
    pub priority: i64,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// 0-100, meaningful only while `status == Processing`.
    pub progress: u8,
    /// Count of prior failed attempts.
    pub retry_count: u32,
    /// Per-job retry cap. Job moves to `Failed` once `retry_count >= max_retries`.
    pub max_retries: u32,
    /// Last failure message, if any.
    pub error: Option<String>,
    /// Set at enqueue.
    pub created_at: DateTime<Utc>,
    /// Set on each transition into `Processing`.
    pub started_at: Option<DateTime<Utc>>,
    /// Set on `Completed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when a retry is scheduled; unset otherwise.
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a new job in `Pending` status, ready for `Queue::enqueue`.
    pub fn new(
        id: impl Into<String>,
        job_type: impl Into<String>,
        payload: Vec<u8>,
        priority: i64,
        max_retries: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            job_type: job_type.into(),
            payload,
            priority,
            status: JobStatus::Pending,
            progress: 0,
            retry_count: 0,
            max_retries,
            error: None,
            created_at,
            started_at: None,
            completed_at: None,
            next_retry_at: None,
        }
    }

    /// Like [`Job::new`], but generates a random v4 UUID as the job id for
    /// producers that don't have a natural id of their own.
    pub fn with_random_id(
        job_type: impl Into<String>,
        payload: Vec<u8>,
        priority: i64,
        max_retries: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            job_type,
            payload,
            priority,
            max_retries,
            created_at,
        )
    }
}

mod payload_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
