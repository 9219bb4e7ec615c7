//! Redis client wrapper
//!
//! Implements [`Store`] on a `fred` connection pool. Scripts are sent with
//! `EVAL` so they run atomically on the server.

pub mod scripts;

use super::{Reply, Script, Store, StoreError, StoreResult};
use crate::error::StoreContext;
use crate::Result;
use async_trait::async_trait;
use fred::{
    interfaces::*,
    prelude::*,
    types::{RedisConfig as FredRedisConfig, ReconnectPolicy},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Redis connection configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Connection pool size
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
        }
    }
}

impl RedisConfig {
    /// Configuration for a URL with the default pool size
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set connection pool size
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }
}

/// Store backed by a Redis server
#[derive(Clone)]
pub struct RedisStore {
    pool: Arc<RedisPool>,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let redis_config = FredRedisConfig::from_url(&config.url)
            .map_err(StoreError::from)
            .context("connect", &config.url)?;
        let pool = RedisPool::new(
            redis_config,
            None,
            None,
            Some(ReconnectPolicy::default()),
            config.pool_size,
        )
        .map_err(StoreError::from)
        .context("connect", &config.url)?;

        pool.init()
            .await
            .map_err(StoreError::from)
            .context("connect", &config.url)?;

        tracing::info!("Connected to Redis at {}", config.url);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Connect from a URL with the default pool size
    pub async fn from_url(url: impl Into<String>) -> Result<Self> {
        Self::new(RedisConfig::from_url(url)).await
    }

    /// Get the underlying Redis connection pool
    pub fn pool(&self) -> &Arc<RedisPool> {
        &self.pool
    }

    /// Ping Redis
    pub async fn ping(&self) -> StoreResult<String> {
        let result: String = self.pool.ping().await?;
        Ok(result)
    }
}

/// Convert a raw reply, mapping Lua `false` to nil
fn to_reply(value: RedisValue) -> StoreResult<Reply> {
    Ok(match value {
        RedisValue::Null => Reply::Nil,
        RedisValue::Boolean(false) => Reply::Nil,
        RedisValue::Boolean(true) => Reply::Int(1),
        RedisValue::Integer(n) => Reply::Int(n),
        RedisValue::Double(d) => Reply::Bulk(d.to_string()),
        RedisValue::String(s) => Reply::Bulk(s.to_string()),
        RedisValue::Bytes(b) => Reply::Bulk(
            String::from_utf8(b.to_vec())
                .map_err(|e| StoreError::UnexpectedReply(format!("non UTF-8 reply: {}", e)))?,
        ),
        RedisValue::Array(items) => {
            Reply::Array(items.into_iter().map(to_reply).collect::<StoreResult<Vec<_>>>()?)
        }
        other => return Err(StoreError::UnexpectedReply(format!("{:?}", other))),
    })
}

/// Score bound as Redis expects it
fn score_bound(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn eval(&self, script: Script, keys: Vec<String>, args: Vec<String>) -> StoreResult<Reply> {
        tracing::trace!("Running script {} on {:?}", script.name(), keys);
        let result: RedisValue = self.pool.eval(scripts::source(script), keys, args).await?;
        to_reply(result)
    }

    async fn lpush(&self, key: &str, value: &str) -> StoreResult<u64> {
        let result: u64 = self.pool.lpush(key, value).await?;
        Ok(result)
    }

    async fn rpop(&self, key: &str) -> StoreResult<Option<String>> {
        let result: Option<String> = self.pool.rpop(key, None).await?;
        Ok(result)
    }

    async fn brpop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        // BRPOP with 0 blocks forever
        if timeout.is_zero() {
            return self.rpop(key).await;
        }
        let result: Option<(String, String)> = self.pool.brpop(key, timeout.as_secs_f64()).await?;
        Ok(result.map(|(_, value)| value))
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        let result: u64 = self.pool.llen(key).await?;
        Ok(result)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let result: Vec<String> = self.pool.lrange(key, start, stop).await?;
        Ok(result)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let values: Vec<(f64, RedisValue)> = vec![(score, member.into())];
        let _: () = self.pool.zadd(key, None, None, false, false, values).await?;
        Ok(())
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> StoreResult<Vec<(String, f64)>> {
        let limit = limit.map(|count| (0, count as i64));
        let result: Vec<RedisValue> = self
            .pool
            .zrangebyscore(key, score_bound(min).as_str(), score_bound(max).as_str(), true, limit)
            .await?;
        // Result comes as alternating member, score, member, score, ...
        let mut output = Vec::new();
        for chunk in result.chunks(2) {
            if chunk.len() == 2 {
                let member = chunk[0].as_string();
                let score = chunk[1].as_f64();
                if let (Some(m), Some(s)) = (member, score) {
                    output.push((m, s));
                }
            }
        }
        Ok(output)
    }

    async fn zrevrange(&self, key: &str) -> StoreResult<Vec<String>> {
        let result: Vec<String> = self.pool.zrevrange(key, 0, -1, false).await?;
        Ok(result)
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let result: u64 = self.pool.zrem(key, member).await?;
        Ok(result > 0)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let result: u64 = self.pool.zcard(key).await?;
        Ok(result)
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let result: Option<String> = self.pool.hget(key, field).await?;
        Ok(result)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let values: Vec<(RedisKey, RedisValue)> = vec![(field.into(), value.into())];
        let _: u64 = self.pool.hset(key, values).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let result: HashMap<String, String> = self.pool.hgetall(key).await?;
        Ok(result)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let result: i64 = self.pool.hincrby(key, field, delta).await?;
        Ok(result)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let result: bool = self.pool.exists(key).await?;
        Ok(result)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1);
        let result: bool = self.pool.pexpire(key, millis, None).await?;
        Ok(result)
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let result: u64 = self.pool.del(keys.to_vec()).await?;
        Ok(result)
    }
}
