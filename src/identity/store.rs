//! Identity store over a [`KvEngine`].
//!
//! Records:
//! - `uid:<uid>` hash: name, password_hash, salt, iterations
//! - `user:<name>` -> uid
//! - `uid:<uid>:auth` -> token, `auth:<token>` -> uid
//! - `global:uid` counter, `users` roster list

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use super::keys::{
    self, FIELD_ITERATIONS, FIELD_LEGACY_PASS, FIELD_NAME, FIELD_PASSWORD_HASH, FIELD_SALT,
};
use super::password::{constant_time_eq, generate_salt, hash_password, verify_password};
use super::{Registration, Uid, UserProfile};
use crate::config::IdentityConfig;
use crate::error::{IdentityError, IdentityResult};
use crate::kv::{EngineError, EngineResult, KvEngine};

/// Stored credentials of one user record.
enum Credentials {
    Hashed {
        hash: String,
        salt: String,
        iterations: u32,
    },
    /// Plaintext password left by records predating hashed storage.
    Legacy { pass: String },
}

impl Credentials {
    fn from_record(
        key: &str,
        record: &HashMap<String, String>,
        default_iterations: u32,
    ) -> IdentityResult<Self> {
        let malformed = |field| IdentityError::MalformedRecord {
            key: key.to_string(),
            field,
        };

        if let Some(hash) = record.get(FIELD_PASSWORD_HASH) {
            let salt = record.get(FIELD_SALT).ok_or_else(|| malformed(FIELD_SALT))?;
            let iterations = match record.get(FIELD_ITERATIONS) {
                Some(raw) => raw
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| malformed(FIELD_ITERATIONS))?,
                None => default_iterations,
            };
            return Ok(Self::Hashed {
                hash: hash.clone(),
                salt: salt.clone(),
                iterations,
            });
        }

        match record.get(FIELD_LEGACY_PASS) {
            Some(pass) => Ok(Self::Legacy { pass: pass.clone() }),
            None => Err(malformed(FIELD_PASSWORD_HASH)),
        }
    }

    fn verify(&self, password: &str) -> bool {
        match self {
            Self::Hashed {
                hash,
                salt,
                iterations,
            } => verify_password(password, salt, hash, *iterations),
            Self::Legacy { pass } => constant_time_eq(pass.as_bytes(), password.as_bytes()),
        }
    }
}

/// Registration, credential checks and bearer tokens.
///
/// Holds no mutable local state; share it behind an `Arc` and call it from
/// any number of tasks.
pub struct IdentityStore<E: KvEngine = Arc<dyn KvEngine>> {
    engine: E,
    config: IdentityConfig,
}

impl<E: KvEngine> IdentityStore<E> {
    pub fn new(engine: E, config: IdentityConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    // ── Users ───────────────────────────────────────────────────────

    /// Whether a name index entry exists for `name`.
    ///
    /// Advisory only: another caller may register the same name between this
    /// check and [`add_user`](Self::add_user) unless
    /// `enforce_unique_names` is set.
    pub async fn exists_by_name(&self, name: &str) -> IdentityResult<bool> {
        Ok(self.engine.exists(&keys::name_index(name)).await?)
    }

    /// Register a user and issue its first token.
    ///
    /// Steps: allocate uid (atomic), write the user hash, write the name
    /// index, prepend to the roster, issue a token. Only the first step is
    /// atomic. Without `enforce_unique_names`, registering an existing name
    /// succeeds and repoints the name index to the new uid.
    pub async fn add_user(&self, name: &str, password: &str) -> IdentityResult<Registration> {
        self.validate_name(name)?;

        let raw = self.engine.incr(keys::UID_COUNTER).await?;
        let uid = Uid(raw);
        let uid_str = uid.to_string();

        let index_key = keys::name_index(name);
        if self.config.enforce_unique_names
            && !self.engine.set_nx(&index_key, &uid_str).await?
        {
            tracing::info!(uid = %uid, "Name already claimed; allocated uid left unused");
            return Err(IdentityError::NameTaken(name.to_string()));
        }

        let salt = generate_salt();
        let password_hash = {
            let (password, salt) = (password.to_owned(), salt.clone());
            let iterations = self.config.hash_iterations;
            run_blocking(move || hash_password(&password, &salt, iterations)).await?
        };
        let iterations = self.config.hash_iterations.to_string();
        self.engine
            .hset(
                &keys::user_record(uid),
                &[
                    (FIELD_NAME, name),
                    (FIELD_PASSWORD_HASH, &password_hash),
                    (FIELD_SALT, &salt),
                    (FIELD_ITERATIONS, &iterations),
                ],
            )
            .await?;

        if !self.config.enforce_unique_names {
            self.engine.set(&index_key, &uid_str).await?;
        }
        self.engine.lpush(keys::USER_ROSTER, name).await?;

        tracing::info!(uid = %uid, engine = self.engine.name(), "Registered user");

        let token = self.issue_for_uid(uid).await?;
        Ok(Registration { uid, token })
    }

    /// Resolve a name through the name index.
    pub async fn find_uid(&self, name: &str) -> IdentityResult<Option<Uid>> {
        let key = keys::name_index(name);
        let raw = absorb_wrong_type(self.engine.get(&key).await)?;
        Ok(raw.and_then(|raw| parse_uid(&key, &raw)))
    }

    /// Resolve a uid to its name. `None` when the record or field is missing.
    pub async fn find_name(&self, uid: Uid) -> IdentityResult<Option<String>> {
        let read = self.engine.hget(&keys::user_record(uid), FIELD_NAME).await;
        let name = absorb_wrong_type(read)?.filter(|n| !n.is_empty());
        if name.is_none() {
            tracing::debug!(uid = %uid, "User record has no name");
        }
        Ok(name)
    }

    /// Check credentials. Unknown users and records without credential
    /// fields yield `false`; only engine failures are errors.
    pub async fn authenticate(&self, name: &str, password: &str) -> IdentityResult<bool> {
        let Some(uid) = self.find_uid(name).await? else {
            return Ok(false);
        };

        let key = keys::user_record(uid);
        let record = absorb_wrong_type(self.engine.hgetall(&key).await)?;
        match Credentials::from_record(&key, &record, self.config.hash_iterations) {
            Ok(credentials) => {
                let password = password.to_owned();
                run_blocking(move || credentials.verify(&password)).await
            }
            Err(e) => {
                tracing::warn!(uid = %uid, "{e}; rejecting authentication");
                Ok(false)
            }
        }
    }

    /// Public view of a user, or `None` when the name is unknown or its
    /// record is missing the name field.
    pub async fn profile(&self, name: &str) -> IdentityResult<Option<UserProfile>> {
        let Some(uid) = self.find_uid(name).await? else {
            return Ok(None);
        };
        let Some(stored_name) = self.find_name(uid).await? else {
            tracing::warn!(uid = %uid, "Name index points at a record without a name");
            return Ok(None);
        };
        let has_token = self.engine.exists(&keys::forward_token(uid)).await?;
        Ok(Some(UserProfile {
            uid,
            name: stored_name,
            has_token,
        }))
    }

    /// Page through the roster, newest registration first.
    pub async fn list_users(&self, offset: usize, limit: usize) -> IdentityResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let start = isize::try_from(offset).unwrap_or(isize::MAX);
        let stop = start.saturating_add(isize::try_from(limit).unwrap_or(isize::MAX) - 1);
        Ok(self.engine.lrange(keys::USER_ROSTER, start, stop).await?)
    }

    /// Roster length. Counts registrations, so a name registered twice
    /// without uniqueness enforcement counts twice.
    pub async fn user_count(&self) -> IdentityResult<u64> {
        Ok(self.engine.llen(keys::USER_ROSTER).await?)
    }

    // ── Tokens ──────────────────────────────────────────────────────

    /// Issue a fresh bearer token for `name`.
    pub async fn issue_auth(&self, name: &str) -> IdentityResult<String> {
        let uid = self
            .find_uid(name)
            .await?
            .ok_or_else(|| IdentityError::NoSuchUser(name.to_string()))?;
        self.issue_for_uid(uid).await
    }

    async fn issue_for_uid(&self, uid: Uid) -> IdentityResult<String> {
        let forward = keys::forward_token(uid);

        if self.config.revoke_previous_token {
            if let Some(previous) = self.engine.get(&forward).await? {
                self.engine.del(&[keys::reverse_token(&previous)]).await?;
                tracing::debug!(uid = %uid, "Dropped previous token");
            }
        }

        // v4 UUID: 122 random bits from the OS RNG.
        let token = Uuid::new_v4().to_string();
        self.engine.set(&forward, &token).await?;
        self.engine
            .set(&keys::reverse_token(&token), &uid.to_string())
            .await?;

        tracing::debug!(uid = %uid, "Issued token");
        Ok(token)
    }

    /// Resolve a token to its owner's name.
    ///
    /// `None` for unknown tokens, reverse entries that no longer match the
    /// owner's current forward entry, and owners whose record has no name.
    pub async fn find_name_for_token(&self, token: &str) -> IdentityResult<Option<String>> {
        let reverse = keys::reverse_token(token);
        let Some(raw) = absorb_wrong_type(self.engine.get(&reverse).await)? else {
            return Ok(None);
        };
        let Some(uid) = parse_uid(&reverse, &raw) else {
            return Ok(None);
        };

        let current = absorb_wrong_type(self.engine.get(&keys::forward_token(uid)).await)?;
        if current.as_deref() != Some(token) {
            tracing::debug!(uid = %uid, "Token is no longer the owner's current token");
            return Ok(None);
        }

        self.find_name(uid).await
    }

    /// Delete the user's current token, forward and reverse entries in one
    /// request. Calling it again is a no-op.
    pub async fn revoke_auth(&self, name: &str) -> IdentityResult<()> {
        let uid = self
            .find_uid(name)
            .await?
            .ok_or_else(|| IdentityError::NoSuchUser(name.to_string()))?;

        let forward = keys::forward_token(uid);
        let mut doomed = vec![forward.clone()];
        if let Some(token) = self.engine.get(&forward).await? {
            doomed.push(keys::reverse_token(&token));
        }

        let removed = self.engine.del(&doomed).await?;
        tracing::info!(uid = %uid, removed, "Revoked token");
        Ok(())
    }

    // ── Health ──────────────────────────────────────────────────────

    /// Whether the engine answers.
    pub async fn health_check(&self) -> bool {
        match self.engine.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(engine = self.engine.name(), "Health check failed: {e}");
                false
            }
        }
    }

    fn validate_name(&self, name: &str) -> IdentityResult<()> {
        if name.trim().is_empty() {
            return Err(IdentityError::InvalidName("name cannot be empty".into()));
        }
        if name.trim() != name {
            return Err(IdentityError::InvalidName(
                "name cannot start or end with whitespace".into(),
            ));
        }
        if name.len() > self.config.max_name_len {
            return Err(IdentityError::InvalidName(format!(
                "name too long (max {} bytes)",
                self.config.max_name_len
            )));
        }
        if name.chars().any(char::is_control) {
            return Err(IdentityError::InvalidName(
                "name cannot contain control characters".into(),
            ));
        }
        Ok(())
    }
}

/// Run CPU-bound password work off the async worker threads.
async fn run_blocking<T, F>(f: F) -> IdentityResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IdentityError::HashTask(e.to_string()))
}

/// A key holding the wrong kind of value is a data fault, not an engine
/// outage: log it and read it as absent.
fn absorb_wrong_type<T: Default>(read: EngineResult<T>) -> IdentityResult<T> {
    match read {
        Err(EngineError::WrongType { key }) => {
            tracing::warn!(key = %key, "Key holds the wrong value type; treating as missing");
            Ok(T::default())
        }
        other => Ok(other?),
    }
}

/// Parse a stored uid; a non-numeric value is a dangling pointer.
fn parse_uid(key: &str, raw: &str) -> Option<Uid> {
    match raw.parse::<Uid>() {
        Ok(uid) => Some(uid),
        Err(_) => {
            tracing::warn!(key, "Stored uid is not numeric; ignoring entry");
            None
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{EngineError, EngineResult, MemoryEngine};
    use async_trait::async_trait;
    use std::collections::HashSet;

    fn test_config() -> IdentityConfig {
        IdentityConfig {
            hash_iterations: 16,
            ..IdentityConfig::default()
        }
    }

    fn test_store() -> IdentityStore<Arc<MemoryEngine>> {
        IdentityStore::new(Arc::new(MemoryEngine::new()), test_config())
    }

    fn store_with(config: IdentityConfig) -> IdentityStore<Arc<MemoryEngine>> {
        IdentityStore::new(Arc::new(MemoryEngine::new()), config)
    }

    #[tokio::test]
    async fn exists_by_name_flips_after_registration() {
        let store = test_store();

        assert!(!store.exists_by_name("alice").await.unwrap());
        store.add_user("alice", "secret").await.unwrap();
        assert!(store.exists_by_name("alice").await.unwrap());
    }

    #[tokio::test]
    async fn register_and_authenticate() {
        let store = test_store();

        let reg = store.add_user("alice", "secret").await.unwrap();
        assert_eq!(reg.uid, Uid(1));
        assert!(!reg.token.is_empty());

        assert!(store.authenticate("alice", "secret").await.unwrap());
        assert!(!store.authenticate("alice", "wrong").await.unwrap());
        assert!(!store.authenticate("bob", "x").await.unwrap());
    }

    #[tokio::test]
    async fn add_user_writes_expected_records() {
        let store = test_store();

        let reg = store.add_user("alice", "secret").await.unwrap();
        let engine = &store.engine;

        assert_eq!(
            engine.get("user:alice").await.unwrap().as_deref(),
            Some("1")
        );
        let record = engine.hgetall("uid:1").await.unwrap();
        assert_eq!(record.get("name").map(String::as_str), Some("alice"));
        assert!(record.contains_key("password_hash"));
        assert!(record.contains_key("salt"));
        assert_eq!(record.get("iterations").map(String::as_str), Some("16"));
        assert_ne!(record.get("password_hash").map(String::as_str), Some("secret"));

        assert_eq!(
            engine.get("uid:1:auth").await.unwrap().as_deref(),
            Some(reg.token.as_str())
        );
        assert_eq!(
            engine
                .get(&format!("auth:{}", reg.token))
                .await
                .unwrap()
                .as_deref(),
            Some("1")
        );
        assert_eq!(engine.lrange("users", 0, -1).await.unwrap(), vec!["alice"]);
        assert_eq!(engine.get("global:uid").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn uids_increase_and_are_never_reused() {
        let store = test_store();

        let a = store.add_user("a", "pw").await.unwrap();
        let b = store.add_user("b", "pw").await.unwrap();
        let c = store.add_user("c", "pw").await.unwrap();
        assert!(a.uid < b.uid && b.uid < c.uid);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_get_distinct_uids() {
        let store = Arc::new(test_store());
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            // Half the callers race on one shared name.
            let name = if i % 2 == 0 {
                "shared".to_string()
            } else {
                format!("user{i}")
            };
            handles.push(tokio::spawn(async move {
                store.add_user(&name, "pw").await.unwrap().uid
            }));
        }

        let mut uids = HashSet::new();
        for h in handles {
            assert!(uids.insert(h.await.unwrap()));
        }
        assert_eq!(uids.len(), 32);
        assert_eq!(store.user_count().await.unwrap(), 32);
    }

    #[tokio::test]
    async fn duplicate_name_last_writer_wins_by_default() {
        let store = test_store();

        let first = store.add_user("alice", "one").await.unwrap();
        let second = store.add_user("alice", "two").await.unwrap();
        assert_ne!(first.uid, second.uid);

        assert_eq!(store.find_uid("alice").await.unwrap(), Some(second.uid));
        assert!(store.authenticate("alice", "two").await.unwrap());
        assert!(!store.authenticate("alice", "one").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_name_rejected_when_enforced() {
        let store = store_with(IdentityConfig {
            enforce_unique_names: true,
            ..test_config()
        });

        let first = store.add_user("alice", "one").await.unwrap();
        let err = store.add_user("alice", "two").await.unwrap_err();
        assert!(matches!(err, IdentityError::NameTaken(ref n) if n == "alice"));

        assert_eq!(store.find_uid("alice").await.unwrap(), Some(first.uid));
        assert!(store.authenticate("alice", "one").await.unwrap());

        // The losing registration still consumed a uid.
        let next = store.add_user("bob", "pw").await.unwrap();
        assert_eq!(next.uid, Uid(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_same_name_has_one_winner_when_enforced() {
        let store = Arc::new(store_with(IdentityConfig {
            enforce_unique_names: true,
            ..test_config()
        }));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.add_user("alice", "pw").await }));
        }

        let mut winners = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => winners += 1,
                Err(IdentityError::NameTaken(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.user_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn invalid_names_are_rejected_before_allocation() {
        let store = store_with(IdentityConfig {
            max_name_len: 8,
            ..test_config()
        });

        for bad in ["", "   ", " alice", "bob ", "toolongname", "a\nb"] {
            let err = store.add_user(bad, "pw").await.unwrap_err();
            assert!(matches!(err, IdentityError::InvalidName(_)), "{bad:?}");
        }
        assert!(store.engine.get("global:uid").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_uid_and_find_name() {
        let store = test_store();

        assert!(store.find_uid("alice").await.unwrap().is_none());
        let reg = store.add_user("alice", "secret").await.unwrap();
        assert_eq!(store.find_uid("alice").await.unwrap(), Some(reg.uid));
        assert_eq!(
            store.find_name(reg.uid).await.unwrap().as_deref(),
            Some("alice")
        );
        assert!(store.find_name(Uid(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_numeric_name_index_reads_as_missing() {
        let store = test_store();
        store.engine.set("user:mallory", "not-a-uid").await.unwrap();

        assert!(store.find_uid("mallory").await.unwrap().is_none());
        assert!(!store.authenticate("mallory", "x").await.unwrap());
        assert!(matches!(
            store.issue_auth("mallory").await.unwrap_err(),
            IdentityError::NoSuchUser(_)
        ));
    }

    #[tokio::test]
    async fn token_issue_and_lookup() {
        let store = test_store();
        store.add_user("alice", "secret").await.unwrap();

        let token = store.issue_auth("alice").await.unwrap();
        assert_eq!(
            store.find_name_for_token(&token).await.unwrap().as_deref(),
            Some("alice")
        );
        assert!(Uuid::parse_str(&token).is_ok());
    }

    #[tokio::test]
    async fn tokens_are_unique() {
        let store = test_store();
        store.add_user("alice", "secret").await.unwrap();

        let mut seen = HashSet::new();
        for _ in 0..50 {
            assert!(seen.insert(store.issue_auth("alice").await.unwrap()));
        }
    }

    #[tokio::test]
    async fn issue_auth_for_unknown_user_fails_without_writes() {
        let store = test_store();

        let err = store.issue_auth("ghost").await.unwrap_err();
        assert!(matches!(err, IdentityError::NoSuchUser(ref n) if n == "ghost"));
        assert_eq!(store.engine.key_count(), 0);
    }

    #[tokio::test]
    async fn unknown_token_resolves_to_none() {
        let store = test_store();
        assert!(store.find_name_for_token("nope").await.unwrap().is_none());
        assert!(store.find_name_for_token("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_invalidates_token_and_reissue_works() {
        let store = test_store();
        let reg = store.add_user("alice", "secret").await.unwrap();

        store.revoke_auth("alice").await.unwrap();
        assert!(store.find_name_for_token(&reg.token).await.unwrap().is_none());
        assert!(!store.engine.exists("uid:1:auth").await.unwrap());
        assert!(!store
            .engine
            .exists(&format!("auth:{}", reg.token))
            .await
            .unwrap());

        let fresh = store.issue_auth("alice").await.unwrap();
        assert_ne!(fresh, reg.token);
        assert_eq!(
            store.find_name_for_token(&fresh).await.unwrap().as_deref(),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn revoke_twice_is_a_no_op() {
        let store = test_store();
        let reg = store.add_user("alice", "secret").await.unwrap();

        store.revoke_auth("alice").await.unwrap();
        store.revoke_auth("alice").await.unwrap();
        assert!(store.find_name_for_token(&reg.token).await.unwrap().is_none());
        assert!(!store.engine.exists("uid:1:auth").await.unwrap());
    }

    #[tokio::test]
    async fn revoke_unknown_user_fails() {
        let store = test_store();
        let err = store.revoke_auth("ghost").await.unwrap_err();
        assert!(matches!(err, IdentityError::NoSuchUser(_)));
    }

    #[tokio::test]
    async fn reissue_drops_previous_token_by_default() {
        let store = test_store();
        let reg = store.add_user("alice", "secret").await.unwrap();

        let next = store.issue_auth("alice").await.unwrap();
        assert!(store.find_name_for_token(&reg.token).await.unwrap().is_none());
        assert!(!store
            .engine
            .exists(&format!("auth:{}", reg.token))
            .await
            .unwrap());
        assert_eq!(
            store.find_name_for_token(&next).await.unwrap().as_deref(),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn reissue_without_revocation_leaves_stale_reverse_entry_unusable() {
        let store = store_with(IdentityConfig {
            revoke_previous_token: false,
            ..test_config()
        });
        let reg = store.add_user("alice", "secret").await.unwrap();
        let next = store.issue_auth("alice").await.unwrap();

        // The old reverse entry is left behind but no longer resolves.
        assert!(store
            .engine
            .exists(&format!("auth:{}", reg.token))
            .await
            .unwrap());
        assert!(store.find_name_for_token(&reg.token).await.unwrap().is_none());
        assert_eq!(
            store.find_name_for_token(&next).await.unwrap().as_deref(),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn reverse_entry_pointing_at_nameless_record_resolves_to_none() {
        let store = test_store();
        let engine = &store.engine;

        engine.set("auth:forged", "999").await.unwrap();
        engine.set("uid:999:auth", "forged").await.unwrap();
        engine.hset("uid:999", &[("salt", "00")]).await.unwrap();
        assert!(store.find_name_for_token("forged").await.unwrap().is_none());

        // Dangling: no record at all.
        engine.set("auth:dangling", "12345").await.unwrap();
        assert!(store.find_name_for_token("dangling").await.unwrap().is_none());

        // Garbage uid.
        engine.set("auth:garbage", "uid-abc").await.unwrap();
        assert!(store.find_name_for_token("garbage").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_without_credentials_fails_authentication() {
        let store = test_store();
        let engine = &store.engine;

        engine.set("user:eve", "5").await.unwrap();
        engine.hset("uid:5", &[("name", "eve")]).await.unwrap();
        assert!(!store.authenticate("eve", "").await.unwrap());
        assert!(!store.authenticate("eve", "anything").await.unwrap());

        // Hash present but salt missing.
        engine
            .hset("uid:5", &[("password_hash", "abcd")])
            .await
            .unwrap();
        assert!(!store.authenticate("eve", "anything").await.unwrap());

        // Name index pointing at nothing.
        engine.set("user:ghost", "77").await.unwrap();
        assert!(!store.authenticate("ghost", "x").await.unwrap());
    }

    #[tokio::test]
    async fn wrong_type_user_record_reads_as_missing() {
        let store = test_store();
        let engine = &store.engine;

        engine.set("user:eve", "5").await.unwrap();
        engine.set("uid:5", "corrupt").await.unwrap();
        assert!(!store.authenticate("eve", "anything").await.unwrap());
        assert!(store.find_name(Uid(5)).await.unwrap().is_none());
        assert!(store.profile("eve").await.unwrap().is_none());

        engine.set("auth:tok", "5").await.unwrap();
        engine.set("uid:5:auth", "tok").await.unwrap();
        assert!(store.find_name_for_token("tok").await.unwrap().is_none());

        // Name index stored as a list.
        engine.lpush("user:lister", "1").await.unwrap();
        assert!(store.find_uid("lister").await.unwrap().is_none());
        assert!(!store.authenticate("lister", "x").await.unwrap());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn password_hashing_leaves_the_runtime_free() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let store = Arc::new(store_with(IdentityConfig {
            hash_iterations: 200_000,
            ..test_config()
        }));
        store.add_user("alice", "secret").await.unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let auth = tokio::spawn({
            let (store, done) = (Arc::clone(&store), Arc::clone(&done));
            async move {
                let ok = store.authenticate("alice", "secret").await.unwrap();
                done.store(true, Ordering::SeqCst);
                ok
            }
        });
        // Runs while the hash is computed on the blocking pool.
        let observer = tokio::spawn({
            let done = Arc::clone(&done);
            async move {
                tokio::task::yield_now().await;
                done.load(Ordering::SeqCst)
            }
        });

        assert!(!observer.await.unwrap());
        assert!(auth.await.unwrap());
    }

    #[tokio::test]
    async fn legacy_plaintext_records_still_authenticate() {
        let store = test_store();
        let engine = &store.engine;

        engine.set("user:carol", "3").await.unwrap();
        engine
            .hset("uid:3", &[("name", "carol"), ("pass", "hunter2")])
            .await
            .unwrap();

        assert!(store.authenticate("carol", "hunter2").await.unwrap());
        assert!(!store.authenticate("carol", "hunter3").await.unwrap());
    }

    #[tokio::test]
    async fn stored_iteration_count_wins_over_config() {
        let writer = test_store();
        writer.add_user("alice", "secret").await.unwrap();

        let reader = IdentityStore::new(
            Arc::clone(&writer.engine),
            IdentityConfig {
                hash_iterations: 99,
                ..test_config()
            },
        );
        assert!(reader.authenticate("alice", "secret").await.unwrap());
    }

    #[tokio::test]
    async fn profile_reports_token_state() {
        let store = test_store();
        let reg = store.add_user("alice", "secret").await.unwrap();

        let profile = store.profile("alice").await.unwrap().unwrap();
        assert_eq!(
            profile,
            UserProfile {
                uid: reg.uid,
                name: "alice".into(),
                has_token: true,
            }
        );

        store.revoke_auth("alice").await.unwrap();
        assert!(!store.profile("alice").await.unwrap().unwrap().has_token);
        assert!(store.profile("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn roster_lists_newest_first() {
        let store = test_store();
        for name in ["a", "b", "c", "d"] {
            store.add_user(name, "pw").await.unwrap();
        }

        assert_eq!(store.list_users(0, 10).await.unwrap(), vec!["d", "c", "b", "a"]);
        assert_eq!(store.list_users(1, 2).await.unwrap(), vec!["c", "b"]);
        assert!(store.list_users(0, 0).await.unwrap().is_empty());
        assert!(store.list_users(10, 5).await.unwrap().is_empty());
        assert_eq!(store.user_count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn health_check_on_memory_engine() {
        assert!(test_store().health_check().await);
    }

    /// Engine whose every call fails as if the server were down.
    struct DownEngine;

    #[async_trait]
    impl KvEngine for DownEngine {
        fn name(&self) -> &str {
            "down"
        }
        async fn incr(&self, _key: &str) -> EngineResult<i64> {
            Err(EngineError::Connection("connection refused".into()))
        }
        async fn exists(&self, _key: &str) -> EngineResult<bool> {
            Err(EngineError::Connection("connection refused".into()))
        }
        async fn get(&self, _key: &str) -> EngineResult<Option<String>> {
            Err(EngineError::Connection("connection refused".into()))
        }
        async fn set(&self, _key: &str, _value: &str) -> EngineResult<()> {
            Err(EngineError::Connection("connection refused".into()))
        }
        async fn set_nx(&self, _key: &str, _value: &str) -> EngineResult<bool> {
            Err(EngineError::Connection("connection refused".into()))
        }
        async fn hset(&self, _key: &str, _fields: &[(&str, &str)]) -> EngineResult<()> {
            Err(EngineError::Connection("connection refused".into()))
        }
        async fn hget(&self, _key: &str, _field: &str) -> EngineResult<Option<String>> {
            Err(EngineError::Connection("connection refused".into()))
        }
        async fn hgetall(&self, _key: &str) -> EngineResult<HashMap<String, String>> {
            Err(EngineError::Connection("connection refused".into()))
        }
        async fn lpush(&self, _key: &str, _value: &str) -> EngineResult<u64> {
            Err(EngineError::Connection("connection refused".into()))
        }
        async fn lrange(&self, _key: &str, _start: isize, _stop: isize) -> EngineResult<Vec<String>> {
            Err(EngineError::Connection("connection refused".into()))
        }
        async fn llen(&self, _key: &str) -> EngineResult<u64> {
            Err(EngineError::Connection("connection refused".into()))
        }
        async fn del(&self, _keys: &[String]) -> EngineResult<u64> {
            Err(EngineError::Connection("connection refused".into()))
        }
        async fn ping(&self) -> EngineResult<()> {
            Err(EngineError::Connection("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn engine_failures_propagate_as_retryable() {
        let store = IdentityStore::new(DownEngine, test_config());

        let err = store.exists_by_name("alice").await.unwrap_err();
        assert!(matches!(err, IdentityError::EngineUnavailable(_)));
        assert!(err.is_retryable());

        assert!(store.add_user("alice", "pw").await.is_err());
        assert!(matches!(
            store.authenticate("alice", "pw").await,
            Err(IdentityError::EngineUnavailable(_))
        ));
        assert!(store.find_name_for_token("t").await.is_err());
        assert!(store.revoke_auth("alice").await.is_err());
        assert!(!store.health_check().await);
    }

    #[tokio::test]
    async fn works_through_dyn_engine() {
        let engine: Arc<dyn KvEngine> = Arc::new(MemoryEngine::new());
        let store: IdentityStore = IdentityStore::new(engine, test_config());

        let reg = store.add_user("alice", "secret").await.unwrap();
        assert_eq!(
            store.find_name_for_token(&reg.token).await.unwrap().as_deref(),
            Some("alice")
        );
    }
}
