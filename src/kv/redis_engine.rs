//! Redis-backed key-value engine.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::traits::{EngineError, EngineResult, KvEngine};

/// Engine over a shared Redis server.
///
/// Holds a [`ConnectionManager`], which multiplexes every caller over one
/// connection and reconnects after drops. Cloning it per call is cheap.
#[derive(Clone)]
pub struct RedisEngine {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisEngine").finish_non_exhaustive()
    }
}

impl RedisEngine {
    /// Open a managed connection to `url` (e.g. `redis://127.0.0.1:6379/`).
    pub async fn connect(url: &str) -> EngineResult<Self> {
        let client = redis::Client::open(url).map_err(EngineError::command)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(map_redis_error)?;
        tracing::debug!(engine = "redis", "Connected to key-value engine");
        Ok(Self { conn })
    }
}

fn map_redis_error(err: redis::RedisError) -> EngineError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        return EngineError::connection(err);
    }
    if err.code() == Some("WRONGTYPE") {
        return EngineError::WrongType {
            key: String::new(),
        };
    }
    EngineError::command(err)
}

/// Attach the key to `WrongType` errors, which Redis reports without it.
fn with_key(key: &str) -> impl Fn(redis::RedisError) -> EngineError + '_ {
    move |err| match map_redis_error(err) {
        EngineError::WrongType { .. } => EngineError::WrongType {
            key: key.to_string(),
        },
        other => other,
    }
}

#[async_trait]
impl KvEngine for RedisEngine {
    fn name(&self) -> &str {
        "redis"
    }

    async fn incr(&self, key: &str) -> EngineResult<i64> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1_i64).await.map_err(with_key(key))
    }

    async fn exists(&self, key: &str) -> EngineResult<bool> {
        let mut conn = self.conn.clone();
        conn.exists(key).await.map_err(with_key(key))
    }

    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(with_key(key))
    }

    async fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        let mut conn = self.conn.clone();
        conn.set(key, value).await.map_err(with_key(key))
    }

    async fn set_nx(&self, key: &str, value: &str) -> EngineResult<bool> {
        let mut conn = self.conn.clone();
        conn.set_nx(key, value).await.map_err(with_key(key))
    }

    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> EngineResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.hset_multiple(key, fields).await.map_err(with_key(key))
    }

    async fn hget(&self, key: &str, field: &str) -> EngineResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.hget(key, field).await.map_err(with_key(key))
    }

    async fn hgetall(&self, key: &str) -> EngineResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        conn.hgetall(key).await.map_err(with_key(key))
    }

    async fn lpush(&self, key: &str, value: &str) -> EngineResult<u64> {
        let mut conn = self.conn.clone();
        conn.lpush(key, value).await.map_err(with_key(key))
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> EngineResult<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.lrange(key, start, stop).await.map_err(with_key(key))
    }

    async fn llen(&self, key: &str) -> EngineResult<u64> {
        let mut conn = self.conn.clone();
        conn.llen(key).await.map_err(with_key(key))
    }

    async fn del(&self, keys: &[String]) -> EngineResult<u64> {
        // DEL with no arguments is a Redis syntax error.
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        conn.del(keys).await.map_err(map_redis_error)
    }

    async fn ping(&self) -> EngineResult<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        if pong != "PONG" {
            return Err(EngineError::Command(format!("unexpected PING reply: {pong}")));
        }
        Ok(())
    }
}
