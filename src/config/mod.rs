pub mod schema;

pub use schema::{Config, EngineConfig, IdentityConfig};
