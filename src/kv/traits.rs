//! Primitive operations required from the backing key-value engine.
//!
//! [`IdentityStore`](crate::identity::IdentityStore) speaks only this trait,
//! so the engine can be a shared network server ([`RedisEngine`]) or an
//! in-process map ([`MemoryEngine`]) for tests and single-node dev setups.
//!
//! [`RedisEngine`]: super::RedisEngine
//! [`MemoryEngine`]: super::MemoryEngine

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

/// Failure reported by a key-value engine call.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine could not be reached (refused, dropped, timed out).
    #[error("connection to key-value engine failed: {0}")]
    Connection(String),

    /// The engine was reached but rejected the command.
    #[error("key-value engine rejected command: {0}")]
    Command(String),

    /// The key exists but holds a different kind of value.
    #[error("key '{key}' holds a value of the wrong type")]
    WrongType { key: String },
}

impl EngineError {
    /// Create a connection error from any error type.
    #[inline]
    pub fn connection<E: std::fmt::Display>(err: E) -> Self {
        Self::Connection(err.to_string())
    }

    /// Create a command error from any error type.
    #[inline]
    pub fn command<E: std::fmt::Display>(err: E) -> Self {
        Self::Command(err.to_string())
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Key-value engine contract.
///
/// Implementations must be thread-safe (`Send + Sync`): every call may be
/// issued concurrently by independent request handlers. Only [`incr`]
/// carries an atomicity guarantee across callers; the engine is the single
/// synchronization point.
///
/// [`incr`]: KvEngine::incr
#[async_trait]
pub trait KvEngine: Send + Sync {
    /// Short backend name for logs ("redis", "memory").
    fn name(&self) -> &str;

    /// Atomically increment the integer at `key` by one and return the new
    /// value. An absent key counts as 0.
    async fn incr(&self, key: &str) -> EngineResult<i64>;

    async fn exists(&self, key: &str) -> EngineResult<bool>;

    async fn get(&self, key: &str) -> EngineResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> EngineResult<()>;

    /// Set `key` only if it is absent. Returns whether the write happened.
    async fn set_nx(&self, key: &str, value: &str) -> EngineResult<bool>;

    /// Write one or more fields of the hash at `key`.
    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> EngineResult<()>;

    async fn hget(&self, key: &str, field: &str) -> EngineResult<Option<String>>;

    /// All fields of the hash at `key`; empty when the key is absent.
    async fn hgetall(&self, key: &str) -> EngineResult<HashMap<String, String>>;

    /// Push `value` onto the front of the list at `key`. Returns the new length.
    async fn lpush(&self, key: &str, value: &str) -> EngineResult<u64>;

    /// Inclusive range of list elements; negative indices count from the end.
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> EngineResult<Vec<String>>;

    async fn llen(&self, key: &str) -> EngineResult<u64>;

    /// Delete all `keys` in one request. Absent keys are ignored; returns
    /// how many keys actually existed.
    async fn del(&self, keys: &[String]) -> EngineResult<u64>;

    /// Round-trip to the engine.
    async fn ping(&self) -> EngineResult<()>;
}

#[async_trait]
impl<E: KvEngine + ?Sized> KvEngine for Arc<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn incr(&self, key: &str) -> EngineResult<i64> {
        (**self).incr(key).await
    }

    async fn exists(&self, key: &str) -> EngineResult<bool> {
        (**self).exists(key).await
    }

    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        (**self).set(key, value).await
    }

    async fn set_nx(&self, key: &str, value: &str) -> EngineResult<bool> {
        (**self).set_nx(key, value).await
    }

    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> EngineResult<()> {
        (**self).hset(key, fields).await
    }

    async fn hget(&self, key: &str, field: &str) -> EngineResult<Option<String>> {
        (**self).hget(key, field).await
    }

    async fn hgetall(&self, key: &str) -> EngineResult<HashMap<String, String>> {
        (**self).hgetall(key).await
    }

    async fn lpush(&self, key: &str, value: &str) -> EngineResult<u64> {
        (**self).lpush(key, value).await
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> EngineResult<Vec<String>> {
        (**self).lrange(key, start, stop).await
    }

    async fn llen(&self, key: &str) -> EngineResult<u64> {
        (**self).llen(key).await
    }

    async fn del(&self, keys: &[String]) -> EngineResult<u64> {
        (**self).del(keys).await
    }

    async fn ping(&self) -> EngineResult<()> {
        (**self).ping().await
    }
}

#[async_trait]
impl<E: KvEngine + ?Sized> KvEngine for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn incr(&self, key: &str) -> EngineResult<i64> {
        (**self).incr(key).await
    }

    async fn exists(&self, key: &str) -> EngineResult<bool> {
        (**self).exists(key).await
    }

    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        (**self).set(key, value).await
    }

    async fn set_nx(&self, key: &str, value: &str) -> EngineResult<bool> {
        (**self).set_nx(key, value).await
    }

    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> EngineResult<()> {
        (**self).hset(key, fields).await
    }

    async fn hget(&self, key: &str, field: &str) -> EngineResult<Option<String>> {
        (**self).hget(key, field).await
    }

    async fn hgetall(&self, key: &str) -> EngineResult<HashMap<String, String>> {
        (**self).hgetall(key).await
    }

    async fn lpush(&self, key: &str, value: &str) -> EngineResult<u64> {
        (**self).lpush(key, value).await
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> EngineResult<Vec<String>> {
        (**self).lrange(key, start, stop).await
    }

    async fn llen(&self, key: &str) -> EngineResult<u64> {
        (**self).llen(key).await
    }

    async fn del(&self, keys: &[String]) -> EngineResult<u64> {
        (**self).del(keys).await
    }

    async fn ping(&self) -> EngineResult<()> {
        (**self).ping().await
    }
}
