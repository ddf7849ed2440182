//! Redis-backed [`Kv`] implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;

use super::{Kv, Pipeline, ScoredMember};

/// Production [`Kv`] adapter backed by Redis via a `deadpool-redis` pool.
pub struct RedisKv {
    pool: Pool,
}

impl RedisKv {
    /// Build a connection pool for `redis_url` and wrap it.
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        let config = Config::from_url(redis_url);
        let pool = config.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self { pool })
    }

    /// Wrap an already-constructed pool (for callers sharing one pool across
    /// subsystems).
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Kv for RedisKv {
    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        let owned: Vec<(String, String)> = fields
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect();
        let _: () = conn.hset_multiple(key, &owned).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = conn.hget(key, field).await?;
        Ok(value)
    }

    async fn hgetall(&self, key: &str) -> anyhow::Result<Option<HashMap<String, String>>> {
        let mut conn = self.pool.get().await?;
        let map: HashMap<String, String> = conn.hgetall(key).await?;
        if map.is_empty() {
            Ok(None)
        } else {
            Ok(Some(map))
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.zrem(key, member).await?;
        Ok(())
    }

    async fn zpop_min(&self, key: &str, n: usize) -> anyhow::Result<Vec<ScoredMember>> {
        let mut conn = self.pool.get().await?;
        let raw: Vec<(String, i64)> = redis::cmd("ZPOPMIN")
            .arg(key)
            .arg(n)
            .query_async(&mut conn)
            .await?;
        Ok(raw
            .into_iter()
            .map(|(member, score)| ScoredMember { member, score })
            .collect())
    }

    fn pipeline(&self) -> Box<dyn Pipeline> {
        Box::new(RedisPipeline {
            pool: self.pool.clone(),
            pipe: redis::pipe(),
        })
    }
}

struct RedisPipeline {
    pool: Pool,
    pipe: redis::Pipeline,
}

#[async_trait]
impl Pipeline for RedisPipeline {
    fn hset(&mut self, key: &str, fields: &[(&str, &str)]) {
        for (field, value) in fields {
            self.pipe.hset(key, *field, *value).ignore();
        }
    }

    fn expire(&mut self, key: &str, ttl: Duration) {
        self.pipe.expire(key, ttl.as_secs() as i64).ignore();
    }

    fn zadd(&mut self, key: &str, score: i64, member: &str) {
        self.pipe.zadd(key, member, score).ignore();
    }

    fn zrem(&mut self, key: &str, member: &str) {
        self.pipe.zrem(key, member).ignore();
    }

    async fn execute(self: Box<Self>) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        self.pipe.query_async(&mut conn).await?;
        Ok(())
    }
}
