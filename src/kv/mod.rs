//! Key-value engine backends.
//!
//! All identity and session state lives in an external engine; this module
//! defines the primitive contract ([`KvEngine`]) and its two backends.

pub mod memory;
pub mod redis_engine;
pub mod traits;

pub use memory::MemoryEngine;
pub use redis_engine::RedisEngine;
pub use traits::{EngineError, EngineResult, KvEngine};

use crate::config::EngineConfig;
use std::sync::Arc;

/// Factory: connect the engine named by config.
pub async fn create_engine(config: &EngineConfig) -> anyhow::Result<Arc<dyn KvEngine>> {
    match config.kind.as_str() {
        "redis" => {
            let engine = RedisEngine::connect(&config.url).await?;
            Ok(Arc::new(engine))
        }
        "memory" => {
            tracing::warn!("Using in-process memory engine; state is not shared or persisted");
            Ok(Arc::new(MemoryEngine::new()))
        }
        other if other.trim().is_empty() => {
            anyhow::bail!("engine.kind cannot be empty. Supported values: redis, memory")
        }
        other => anyhow::bail!("Unknown engine kind '{other}'. Supported values: redis, memory"),
    }
}
