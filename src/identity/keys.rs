//! Key naming scheme shared with existing deployments.
//!
//! | Record          | Key              | Kind  |
//! |-----------------|------------------|-------|
//! | user record     | `uid:<uid>`      | hash  |
//! | name index      | `user:<name>`    | value |
//! | forward token   | `uid:<uid>:auth` | value |
//! | reverse token   | `auth:<token>`   | value |
//! | uid counter     | `global:uid`     | value |
//! | user roster     | `users`          | list  |

use super::Uid;

/// Atomic counter holding the last allocated uid.
pub const UID_COUNTER: &str = "global:uid";

/// Roster of registered names, newest first.
pub const USER_ROSTER: &str = "users";

/// User record hash fields.
pub const FIELD_NAME: &str = "name";
pub const FIELD_PASSWORD_HASH: &str = "password_hash";
pub const FIELD_SALT: &str = "salt";
pub const FIELD_ITERATIONS: &str = "iterations";
/// Plaintext password field written by the earlier system.
pub const FIELD_LEGACY_PASS: &str = "pass";

pub fn user_record(uid: Uid) -> String {
    format!("uid:{uid}")
}

pub fn name_index(name: &str) -> String {
    format!("user:{name}")
}

pub fn forward_token(uid: Uid) -> String {
    format!("uid:{uid}:auth")
}

pub fn reverse_token(token: &str) -> String {
    format!("auth:{token}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_match_deployed_layout() {
        assert_eq!(user_record(Uid(42)), "uid:42");
        assert_eq!(name_index("alice"), "user:alice");
        assert_eq!(forward_token(Uid(42)), "uid:42:auth");
        assert_eq!(
            reverse_token("86e0c630-a919-4074-9503-6e2babe2a800"),
            "auth:86e0c630-a919-4074-9503-6e2babe2a800"
        );
    }
}
