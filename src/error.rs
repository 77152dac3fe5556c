//! Identity store error types.

use crate::kv::EngineError;

/// Error returned by [`IdentityStore`](crate::identity::IdentityStore).
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The name does not resolve to a uid.
    #[error("no such user: {0}")]
    NoSuchUser(String),

    /// Another registration already claimed this name.
    #[error("user name '{0}' is already taken")]
    NameTaken(String),

    /// The name cannot be used as a handle.
    #[error("invalid user name: {0}")]
    InvalidName(String),

    /// The key-value engine could not be reached. Never retried internally.
    #[error("key-value engine unavailable: {0}")]
    EngineUnavailable(#[source] EngineError),

    /// The engine answered but refused the request (bad command, wrong
    /// value type). Retrying the same call will not help.
    #[error("key-value engine rejected request: {0}")]
    EngineRejected(#[source] EngineError),

    /// The blocking password-hashing task panicked or was cancelled.
    #[error("password hashing task failed: {0}")]
    HashTask(String),

    /// A user record lacks a field it should carry.
    #[error("malformed record at '{key}': missing field '{field}'")]
    MalformedRecord { key: String, field: &'static str },
}

impl From<EngineError> for IdentityError {
    fn from(err: EngineError) -> Self {
        if err.is_retryable() {
            Self::EngineUnavailable(err)
        } else {
            Self::EngineRejected(err)
        }
    }
}

impl IdentityError {
    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EngineUnavailable(_))
    }
}

pub type IdentityResult<T> = Result<T, IdentityError>;
