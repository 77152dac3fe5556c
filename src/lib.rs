//! User identity and session-token store backed by a shared key-value engine.
//!
//! [`IdentityStore`] assigns numeric uids, keeps salted password hashes and
//! issues opaque bearer tokens. All state lives in the engine behind
//! [`KvEngine`], usually Redis, so any number of processes can share it.

pub mod config;
pub mod error;
pub mod identity;
pub mod kv;

pub use config::Config;
pub use error::{IdentityError, IdentityResult};
pub use identity::{IdentityStore, Registration, Uid, UserProfile};
pub use kv::{create_engine, EngineError, KvEngine, MemoryEngine, RedisEngine};
