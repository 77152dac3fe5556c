use anyhow::{bail, Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding `engine.kind`.
pub const ENV_ENGINE_KIND: &str = "IDENTITY_KV_ENGINE_KIND";

/// Environment variable overriding `engine.url`.
pub const ENV_ENGINE_URL: &str = "IDENTITY_KV_ENGINE_URL";

/// Default PBKDF2 rounds for stored password hashes.
pub const DEFAULT_HASH_ITERATIONS: u32 = 100_000;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Where the file was loaded from (not serialized).
    #[serde(skip)]
    #[schemars(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Key-value engine connection.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EngineConfig {
    /// Backend kind: "redis" or "memory".
    #[serde(default = "default_engine_kind")]
    pub kind: String,

    /// Connection URL for network backends.
    #[serde(default = "default_engine_url")]
    pub url: String,
}

fn default_engine_kind() -> String {
    "redis".into()
}

fn default_engine_url() -> String {
    "redis://127.0.0.1:6379/".into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: default_engine_kind(),
            url: default_engine_url(),
        }
    }
}

/// Identity store behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IdentityConfig {
    /// Delete a user's previous token pair before issuing a new one
    /// (single live session per user).
    #[serde(default = "default_true")]
    pub revoke_previous_token: bool,

    /// Claim the name index with set-if-absent during registration and
    /// reject the second registrant instead of overwriting.
    #[serde(default)]
    pub enforce_unique_names: bool,

    /// PBKDF2-HMAC-SHA256 rounds for new password hashes.
    #[serde(default = "default_hash_iterations")]
    pub hash_iterations: u32,

    /// Maximum user name length in bytes.
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,
}

fn default_true() -> bool {
    true
}

fn default_hash_iterations() -> u32 {
    DEFAULT_HASH_ITERATIONS
}

fn default_max_name_len() -> usize {
    64
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            revoke_previous_token: true,
            enforce_unique_names: false,
            hash_iterations: default_hash_iterations(),
            max_name_len: default_max_name_len(),
        }
    }
}

impl Config {
    /// Default location: `~/.identity-kv/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        Ok(home.join(".identity-kv").join("config.toml"))
    }

    /// Load from `path` (or the default location), falling back to defaults
    /// when the file does not exist, then apply environment overrides.
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(shellexpand::tilde(p).into_owned()),
            None => Self::default_path()?,
        };

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            Self::default()
        };
        config.config_path = config_path;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(kind) = std::env::var(ENV_ENGINE_KIND) {
            if !kind.trim().is_empty() {
                self.engine.kind = kind.trim().to_string();
            }
        }
        if let Ok(url) = std::env::var(ENV_ENGINE_URL) {
            if !url.trim().is_empty() {
                self.engine.url = url.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.kind == "redis" && self.engine.url.trim().is_empty() {
            bail!("engine.url cannot be empty when engine.kind = 'redis'");
        }
        if self.identity.hash_iterations == 0 {
            bail!("identity.hash_iterations must be at least 1");
        }
        if self.identity.max_name_len == 0 {
            bail!("identity.max_name_len must be at least 1");
        }
        Ok(())
    }

    /// JSON Schema of the config file, pretty-printed.
    pub fn json_schema() -> Result<String> {
        let schema = schemars::schema_for!(Config);
        Ok(serde_json::to_string_pretty(&schema)?)
    }
}
