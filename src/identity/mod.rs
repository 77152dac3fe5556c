//! User identity and session tokens over a shared key-value engine.
//!
//! Provides:
//! - Registration with an atomically allocated numeric uid
//! - Credential checks against salted PBKDF2 hashes (legacy plaintext
//!   records still verify)
//! - Opaque bearer tokens with forward (`uid -> token`) and reverse
//!   (`token -> uid`) entries, issued on login and deleted on logout
//!
//! ## Design Decisions
//! - No in-process state or caching: every call goes to the engine, which is
//!   the only synchronization point across instances.
//! - Only uid allocation is atomic. Multi-key writes are best effort; a crash
//!   between steps can leave a uid without a name index, or a forward token
//!   without its reverse entry. Readers treat such gaps as "not found".

pub mod keys;
pub mod password;
pub mod store;

pub use store::IdentityStore;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Numeric user identifier, allocated from the engine's counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(pub i64);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Uid {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Uid)
    }
}

/// Result of a successful registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub uid: Uid,
    /// Bearer token issued for the new user.
    pub token: String,
}

/// Public view of a registered user. Never carries credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: Uid,
    pub name: String,
    /// Whether the user currently holds a live token.
    pub has_token: bool,
}
