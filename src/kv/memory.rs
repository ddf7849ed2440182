//! In-process [`Kv`] double used by tests and by embedding callers that don't
//! want an external Redis dependency.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use super::{Kv, Pipeline, ScoredMember};

#[derive(Default)]
struct Store {
    hashes: HashMap<String, HashMap<String, String>>,
    sorted_sets: HashMap<String, Vec<(String, i64)>>,
}

enum Op {
    HSet(String, Vec<(String, String)>),
    Expire(String, Duration),
    ZAdd(String, i64, String),
    ZRem(String, String),
}

impl Store {
    fn apply(&mut self, op: Op) {
        match op {
            Op::HSet(key, fields) => {
                let entry = self.hashes.entry(key).or_default();
                for (field, value) in fields {
                    entry.insert(field, value);
                }
            }
            Op::Expire(_key, _ttl) => {
                // TTL bookkeeping is not modeled in-memory: tests run fast
                // enough that expiry never fires, and the real TTL contract
                // is exercised against RedisKv.
            }
            Op::ZAdd(key, score, member) => {
                let set = self.sorted_sets.entry(key).or_default();
                if let Some(existing) = set.iter_mut().find(|(m, _)| *m == member) {
                    existing.1 = score;
                } else {
                    set.push((member, score));
                }
            }
            Op::ZRem(key, member) => {
                if let Some(set) = self.sorted_sets.get_mut(&key) {
                    set.retain(|(m, _)| *m != member);
                }
            }
        }
    }
}

/// An in-memory stand-in for a Redis-like store. Not distributed, but
/// faithful to the `Kv` contract's atomicity guarantees within one process.
#[derive(Default)]
pub struct MemoryKv {
    store: RwLock<Store>,
}

impl MemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> anyhow::Result<()> {
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        let entry = store.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            entry.insert(field.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> anyhow::Result<Option<String>> {
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        Ok(store
            .hashes
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    async fn hgetall(&self, key: &str) -> anyhow::Result<Option<HashMap<String, String>>> {
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        Ok(store.hashes.get(key).cloned())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> anyhow::Result<()> {
        Ok(())
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> anyhow::Result<()> {
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        store.apply(Op::ZAdd(key.to_string(), score, member.to_string()));
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> anyhow::Result<()> {
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        store.apply(Op::ZRem(key.to_string(), member.to_string()));
        Ok(())
    }

    async fn zpop_min(&self, key: &str, n: usize) -> anyhow::Result<Vec<ScoredMember>> {
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        let Some(set) = store.sorted_sets.get_mut(key) else {
            return Ok(Vec::new());
        };
        set.sort_by_key(|(_, score)| *score);
        let popped: Vec<(String, i64)> = set.drain(..n.min(set.len())).collect();
        Ok(popped
            .into_iter()
            .map(|(member, score)| ScoredMember { member, score })
            .collect())
    }

    fn pipeline(&self) -> Box<dyn Pipeline> {
        Box::new(MemoryPipeline {
            store: self,
            ops: Vec::new(),
        })
    }
}

struct MemoryPipeline<'a> {
    store: &'a MemoryKv,
    ops: Vec<Op>,
}

#[async_trait]
impl<'a> Pipeline for MemoryPipeline<'a> {
    fn hset(&mut self, key: &str, fields: &[(&str, &str)]) {
        let owned = fields
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect();
        self.ops.push(Op::HSet(key.to_string(), owned));
    }

    fn expire(&mut self, key: &str, ttl: Duration) {
        self.ops.push(Op::Expire(key.to_string(), ttl));
    }

    fn zadd(&mut self, key: &str, score: i64, member: &str) {
        self.ops.push(Op::ZAdd(key.to_string(), score, member.to_string()));
    }

    fn zrem(&mut self, key: &str, member: &str) {
        self.ops.push(Op::ZRem(key.to_string(), member.to_string()));
    }

    async fn execute(self: Box<Self>) -> anyhow::Result<()> {
        let mut store = self.store.store.write().unwrap_or_else(|e| e.into_inner());
        for op in self.ops {
            store.apply(op);
        }
        Ok(())
    }
}
