//! In-memory store implementations.
//!
//! [`MemoryStore`] implements [`TokenStore`], [`PermissionStore`] and
//! [`UserStore`] over concurrent maps. It backs the demo binary and the test
//! suites; a production deployment plugs a database-backed store into the same
//! traits.
//!
//! # Example
//!
//! ```
//! use cinegate_core::memory::MemoryStore;
//! use cinegate_core::{TokenScope, TokenStore};
//! use chrono::Duration;
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! let user = store.create_user(true);
//! store.grant(user, ["movies:read"]);
//!
//! let token = store.issue_token(user, Duration::hours(24), TokenScope::Authentication);
//! let record = store
//!     .find_active_token(&token.hash(), TokenScope::Authentication)
//!     .await
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(record.user_id, user);
//! # });
//! ```

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration as StdDuration;

use crate::identity::{Permissions, UserId};
use crate::store::{PermissionStore, StoreError, TokenStore, UserRecord, UserStore};
use crate::token::{PlaintextToken, TokenHash, TokenRecord, TokenScope};

/// Concurrent in-memory store for users, tokens and permissions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<UserId, UserRecord>,
    tokens: DashMap<TokenHash, TokenRecord>,
    permissions: DashMap<UserId, Permissions>,
    next_user_id: AtomicI64,
    latency: Option<StdDuration>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every read by `latency`, to exercise deadlines.
    #[must_use]
    pub fn with_latency(mut self, latency: StdDuration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes every read fail with [`StoreError::Unavailable`] while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Creates a user and returns its ID.
    pub fn create_user(&self, activated: bool) -> UserId {
        let id = UserId::new(self.next_user_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.users.insert(id, UserRecord { id, activated });
        id
    }

    /// Sets a user's activation flag.
    pub fn set_activated(&self, user_id: UserId, activated: bool) -> Result<(), StoreError> {
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::constraint(format!("no user with id {user_id}")))?;
        user.activated = activated;
        Ok(())
    }

    /// Grants permission codes to a user.
    pub fn grant<I, S>(&self, user_id: UserId, codes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entry = self.permissions.entry(user_id).or_default();
        for code in codes {
            entry.insert(code);
        }
    }

    /// Stores an already-built token record.
    pub fn insert_token(&self, record: TokenRecord) {
        self.tokens.insert(record.hash, record);
    }

    /// Issues and stores a new token, returning its plaintext.
    pub fn issue_token(&self, user_id: UserId, ttl: Duration, scope: TokenScope) -> PlaintextToken {
        let (plaintext, record) = TokenRecord::issue(user_id, ttl, scope);
        self.insert_token(record);
        plaintext
    }

    /// Deletes every token of `scope` belonging to `user_id`.
    pub fn delete_tokens_for_user(&self, user_id: UserId, scope: TokenScope) -> usize {
        let before = self.tokens.len();
        self.tokens
            .retain(|_, record| !(record.user_id == user_id && record.scope == scope));
        before - self.tokens.len()
    }

    /// Removes a user together with its permissions and every token it
    /// holds. Returns `false` if the user did not exist.
    pub fn delete_user(&self, user_id: UserId) -> bool {
        self.permissions.remove(&user_id);
        self.tokens.retain(|_, record| record.user_id != user_id);
        self.users.remove(&user_id).is_some()
    }

    async fn before_read(&self) -> Result<(), StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory store marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn find_active_token(
        &self,
        hash: &TokenHash,
        scope: TokenScope,
    ) -> Result<Option<TokenRecord>, StoreError> {
        self.before_read().await?;
        let now = Utc::now();
        Ok(self
            .tokens
            .get(hash)
            .filter(|record| record.is_active(scope, now))
            .map(|record| record.clone()))
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn permissions_for(&self, user_id: UserId) -> Result<Permissions, StoreError> {
        self.before_read().await?;
        Ok(self
            .permissions
            .get(&user_id)
            .map(|perms| perms.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError> {
        self.before_read().await?;
        Ok(self.users.get(&user_id).map(|user| user.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_ids_are_sequential() {
        let store = MemoryStore::new();
        assert_eq!(store.create_user(false), UserId::new(1));
        assert_eq!(store.create_user(false), UserId::new(2));
    }

    #[tokio::test]
    async fn test_activation_round_trip() {
        let store = MemoryStore::new();
        let user = store.create_user(false);
        assert!(!store.find_user(user).await.unwrap().unwrap().activated);

        store.set_activated(user, true).unwrap();
        assert!(store.find_user(user).await.unwrap().unwrap().activated);

        assert!(store.set_activated(UserId::new(99), true).is_err());
    }

    #[tokio::test]
    async fn test_expired_and_wrong_scope_tokens_are_not_found() {
        let store = MemoryStore::new();
        let user = store.create_user(true);

        let expired = store.issue_token(user, Duration::seconds(-1), TokenScope::Authentication);
        let activation = store.issue_token(user, Duration::hours(1), TokenScope::Activation);

        let found = store
            .find_active_token(&expired.hash(), TokenScope::Authentication)
            .await
            .unwrap();
        assert!(found.is_none());

        let found = store
            .find_active_token(&activation.hash(), TokenScope::Authentication)
            .await
            .unwrap();
        assert!(found.is_none());

        let found = store
            .find_active_token(&activation.hash(), TokenScope::Activation)
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_delete_tokens_for_user_is_scoped() {
        let store = MemoryStore::new();
        let alice = store.create_user(true);
        let bob = store.create_user(true);

        store.issue_token(alice, Duration::hours(1), TokenScope::Activation);
        store.issue_token(alice, Duration::hours(1), TokenScope::Authentication);
        store.issue_token(bob, Duration::hours(1), TokenScope::Activation);

        assert_eq!(store.delete_tokens_for_user(alice, TokenScope::Activation), 1);
        assert_eq!(store.tokens.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_user_leaves_nothing_behind() {
        let store = MemoryStore::new();
        let alice = store.create_user(false);
        let bob = store.create_user(true);
        store.grant(alice, ["movies:read"]);
        let activation = store.issue_token(alice, Duration::days(3), TokenScope::Activation);
        store.issue_token(alice, Duration::hours(1), TokenScope::Authentication);
        store.issue_token(bob, Duration::hours(1), TokenScope::Authentication);

        assert!(store.delete_user(alice));
        assert!(store.find_user(alice).await.unwrap().is_none());
        assert!(store.permissions_for(alice).await.unwrap().is_empty());
        assert!(store
            .find_active_token(&activation.hash(), TokenScope::Activation)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.tokens.len(), 1);

        assert!(!store.delete_user(alice));
        assert!(store.find_user(bob).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_permissions_default_to_empty() {
        let store = MemoryStore::new();
        let user = store.create_user(true);
        assert!(store.permissions_for(user).await.unwrap().is_empty());

        store.grant(user, ["movies:read", "movies:write"]);
        let perms = store.permissions_for(user).await.unwrap();
        assert!(perms.includes("movies:read"));
        assert!(perms.includes("movies:write"));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_reads() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.find_user(UserId::new(1)).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.find_user(UserId::new(1)).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let store = MemoryStore::new().with_latency(StdDuration::from_millis(250));
        let started = tokio::time::Instant::now();
        store.permissions_for(UserId::new(1)).await.unwrap();
        assert!(started.elapsed() >= StdDuration::from_millis(250));
    }
}
