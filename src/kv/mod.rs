//! Contract over a remote key/value store providing the hash and sorted-set
//! primitives the queue is built on.
//!
//! Two implementations ship here: [`redis_kv::RedisKv`] for production and
//! [`memory::MemoryKv`] for tests and embedded/zero-dependency use.

mod memory;
mod redis_kv;

pub use memory::MemoryKv;
pub use redis_kv::RedisKv;

use async_trait::async_trait;
use std::time::Duration;

/// A single member popped from a sorted set, with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    /// The sorted-set member (e.g. a job id).
    pub member: String,
    /// The member's score at the time it was popped.
    pub score: i64,
}

/// A batch of operations executed as one round-trip against the store.
///
/// Operations within a pipeline are not required to be transactional, but
/// MUST be dispatched in submission order.
#[async_trait]
pub trait Pipeline: Send {
    /// Queue a hash-field write.
    fn hset(&mut self, key: &str, fields: &[(&str, &str)]);

    /// Queue a TTL on a key.
    fn expire(&mut self, key: &str, ttl: Duration);

    /// Queue adding a member to a sorted set with the given score.
    fn zadd(&mut self, key: &str, score: i64, member: &str);

    /// Queue removing a member from a sorted set.
    fn zrem(&mut self, key: &str, member: &str);

    /// Execute all queued operations as a single round-trip.
    async fn execute(self: Box<Self>) -> anyhow::Result<()>;
}

/// Atomic hash + sorted-set primitives consumed by [`crate::queue::Queue`].
#[async_trait]
pub trait Kv: Send + Sync {
    /// Set one or more fields of a hash, atomically per call.
    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> anyhow::Result<()>;

    /// Read one field of a hash.
    async fn hget(&self, key: &str, field: &str) -> anyhow::Result<Option<String>>;

    /// Read all fields of a hash.
    async fn hgetall(&self, key: &str) -> anyhow::Result<Option<std::collections::HashMap<String, String>>>;

    /// Set a TTL on a key.
    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<()>;

    /// Add a member to a sorted set with the given score (upserts the score
    /// if the member is already present).
    async fn zadd(&self, key: &str, score: i64, member: &str) -> anyhow::Result<()>;

    /// Remove a member from a sorted set.
    async fn zrem(&self, key: &str, member: &str) -> anyhow::Result<()>;

    /// Atomically pop up to `n` members with the lowest scores.
    ///
    /// MUST be atomic: the pop and the removal from the set happen as one
    /// indivisible step, so two concurrent callers never observe the same
    /// member.
    async fn zpop_min(&self, key: &str, n: usize) -> anyhow::Result<Vec<ScoredMember>>;

    /// Start a buffered pipeline. Operations queued on it are dispatched in
    /// submission order as a single round-trip on `execute`.
    fn pipeline(&self) -> Box<dyn Pipeline>;
}
