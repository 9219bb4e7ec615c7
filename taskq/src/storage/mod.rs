//! Storage layer
//!
//! The [`Store`] trait is the only surface the queues talk to: single-key
//! list, sorted-set, hash and key operations plus a fixed set of atomic
//! scripts. [`RedisStore`] runs the scripts as Lua on the server;
//! [`MemoryStore`] runs the same procedures under one in-process lock.

pub mod keys;
pub mod memory;
pub mod redis;

pub use keys::Keys;
pub use memory::MemoryStore;
pub use redis::{RedisConfig, RedisStore};

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failure reported by a store implementation
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Redis client errors
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::RedisError),

    /// Key holds a value of another type
    #[error("WRONGTYPE operation against key '{0}' holding the wrong kind of value")]
    WrongType(String),

    /// Script or command replied with something the caller cannot interpret
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    /// Store cannot serve requests
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Atomic procedures every store must provide
///
/// Keys and arguments are positional, exactly as `KEYS[n]` / `ARGV[n]` in
/// the Lua sources under [`redis::scripts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    /// KEYS: record, list. ARGV: data, id.
    /// Replies 0 if the record exists, else stores it, pushes the id and replies 1.
    Enqueue,
    /// KEYS: record, list, dedup. ARGV: data, id, dedup ttl (ms).
    /// Replies 0 on an id collision, -1 on a live dedup marker, 1 when stored.
    EnqueueDedup,
    /// KEYS: record, sorted set. ARGV: data, id, score.
    /// Replies 0 if the record exists, else stores it, adds the id and replies 1.
    EnqueueScheduled,
    /// KEYS: record. Replies the record data and deletes it, or nil.
    TakeRecord,
    /// KEYS: sorted set. ARGV: max score, record key prefix.
    /// Removes the lowest member scored at or below max score and takes its
    /// record. Replies nil, `[id]` when the record was missing, or `[id, data]`.
    PopDue,
    /// KEYS: group list, timer, record. ARGV: id, data, max batch size, max wait (ms).
    /// Replies 0 if the record exists, 1 when added, 2 when the group is full.
    GroupAdd,
    /// KEYS: group list, timer. Replies all member ids and clears both keys.
    GroupDrain,
    /// KEYS: credit hash. ARGV: field, increment, field, increment, ...
    /// Replies the new value of every field in argument order.
    IncrementCredits,
}

impl Script {
    /// Script name used in logs and error context
    pub fn name(&self) -> &'static str {
        match self {
            Script::Enqueue => "enqueue",
            Script::EnqueueDedup => "enqueue_dedup",
            Script::EnqueueScheduled => "enqueue_scheduled",
            Script::TakeRecord => "take_record",
            Script::PopDue => "pop_due",
            Script::GroupAdd => "group_add",
            Script::GroupDrain => "group_drain",
            Script::IncrementCredits => "increment_credits",
        }
    }
}

/// Store-neutral script reply
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Absent value
    Nil,
    /// Integer reply
    Int(i64),
    /// String reply
    Bulk(String),
    /// Array reply
    Array(Vec<Reply>),
}

impl Reply {
    /// Interpret the reply as an integer
    pub fn into_int(self) -> StoreResult<i64> {
        match self {
            Reply::Int(n) => Ok(n),
            Reply::Bulk(s) => s
                .parse()
                .map_err(|_| StoreError::UnexpectedReply(format!("expected integer, got '{}'", s))),
            other => Err(StoreError::UnexpectedReply(format!("expected integer, got {:?}", other))),
        }
    }

    /// Interpret the reply as an optional string
    pub fn into_bulk(self) -> StoreResult<Option<String>> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Bulk(s) => Ok(Some(s)),
            Reply::Int(n) => Ok(Some(n.to_string())),
            other => Err(StoreError::UnexpectedReply(format!("expected string, got {:?}", other))),
        }
    }

    /// Interpret the reply as an array (nil is an empty array)
    pub fn into_array(self) -> StoreResult<Vec<Reply>> {
        match self {
            Reply::Nil => Ok(Vec::new()),
            Reply::Array(items) => Ok(items),
            other => Err(StoreError::UnexpectedReply(format!("expected array, got {:?}", other))),
        }
    }

    /// Interpret the reply as a list of strings
    pub fn into_strings(self) -> StoreResult<Vec<String>> {
        self.into_array()?
            .into_iter()
            .map(|item| {
                item.into_bulk()?
                    .ok_or_else(|| StoreError::UnexpectedReply("nil inside array".to_string()))
            })
            .collect()
    }
}

/// Capability wrapper over the backing store
///
/// Implementations must be safe for concurrent use, and each [`Script`] must
/// run without interleaving with any other caller.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run an atomic script
    async fn eval(&self, script: Script, keys: Vec<String>, args: Vec<String>) -> StoreResult<Reply>;

    /// Push to the head of a list, returning the new length
    async fn lpush(&self, key: &str, value: &str) -> StoreResult<u64>;

    /// Pop from the tail of a list
    async fn rpop(&self, key: &str) -> StoreResult<Option<String>>;

    /// Pop from the tail of a list, waiting up to `timeout` for an element
    async fn brpop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>>;

    /// List length
    async fn llen(&self, key: &str) -> StoreResult<u64>;

    /// List elements by index range (inclusive, negative from the tail)
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>>;

    /// Add or update a sorted-set member
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;

    /// Sorted-set members with `min <= score <= max`, ascending, at most `limit`
    async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> StoreResult<Vec<(String, f64)>>;

    /// All sorted-set members, highest score first
    async fn zrevrange(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Remove a sorted-set member
    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Sorted-set cardinality
    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    /// Get a hash field
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Set a hash field
    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// All fields of a hash
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Increment an integer hash field
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Set a key's time to live, with millisecond precision
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Delete keys, returning how many existed
    async fn del(&self, keys: &[String]) -> StoreResult<u64>;
}
