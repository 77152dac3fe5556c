//! In-process key-value engine.
//!
//! Mirrors the Redis semantics the identity store relies on (integer
//! counters, typed keys, idempotent delete) without any network. State
//! lives only as long as the engine value, so it is not shared between
//! processes: use it for tests and single-node development.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::traits::{EngineError, EngineResult, KvEngine};

/// One stored value.
#[derive(Debug, Clone)]
enum Entry {
    Str(String),
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
}

/// Thread-safe in-memory engine.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored (for diagnostics and tests).
    pub fn key_count(&self) -> usize {
        self.entries.lock().len()
    }
}

fn wrong_type(key: &str) -> EngineError {
    EngineError::WrongType {
        key: key.to_string(),
    }
}

/// Resolve a Redis-style inclusive `[start, stop]` range against `len`.
fn list_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl KvEngine for MemoryEngine {
    fn name(&self) -> &str {
        "memory"
    }

    async fn incr(&self, key: &str) -> EngineResult<i64> {
        let mut entries = self.entries.lock();
        let current = match entries.get(key) {
            None => 0,
            Some(Entry::Str(s)) => s.parse::<i64>().map_err(|_| {
                EngineError::Command(format!("value at '{key}' is not an integer"))
            })?,
            Some(_) => return Err(wrong_type(key)),
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| EngineError::Command(format!("increment at '{key}' would overflow")))?;
        entries.insert(key.to_string(), Entry::Str(next.to_string()));
        Ok(next)
    }

    async fn exists(&self, key: &str) -> EngineResult<bool> {
        Ok(self.entries.lock().contains_key(key))
    }

    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        match self.entries.lock().get(key) {
            None => Ok(None),
            Some(Entry::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        self.entries
            .lock()
            .insert(key.to_string(), Entry::Str(value.to_string()));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str) -> EngineResult<bool> {
        let mut entries = self.entries.lock();
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry::Str(value.to_string()));
        Ok(true)
    }

    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> EngineResult<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(HashMap::new()));
        match entry {
            Entry::Hash(map) => {
                for (field, value) in fields {
                    map.insert((*field).to_string(), (*value).to_string());
                }
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> EngineResult<Option<String>> {
        match self.entries.lock().get(key) {
            None => Ok(None),
            Some(Entry::Hash(map)) => Ok(map.get(field).cloned()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hgetall(&self, key: &str) -> EngineResult<HashMap<String, String>> {
        match self.entries.lock().get(key) {
            None => Ok(HashMap::new()),
            Some(Entry::Hash(map)) => Ok(map.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn lpush(&self, key: &str, value: &str) -> EngineResult<u64> {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(VecDeque::new()));
        match entry {
            Entry::List(list) => {
                list.push_front(value.to_string());
                Ok(list.len() as u64)
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> EngineResult<Vec<String>> {
        match self.entries.lock().get(key) {
            None => Ok(Vec::new()),
            Some(Entry::List(list)) => Ok(match list_bounds(list.len(), start, stop) {
                Some((from, to)) => list.range(from..=to).cloned().collect(),
                None => Vec::new(),
            }),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn llen(&self, key: &str) -> EngineResult<u64> {
        match self.entries.lock().get(key) {
            None => Ok(0),
            Some(Entry::List(list)) => Ok(list.len() as u64),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn del(&self, keys: &[String]) -> EngineResult<u64> {
        let mut entries = self.entries.lock();
        let removed = keys.iter().filter(|k| entries.remove(*k).is_some()).count();
        Ok(removed as u64)
    }

    async fn ping(&self) -> EngineResult<()> {
        Ok(())
    }
}
