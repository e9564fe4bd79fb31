//! Store seams consumed by the gateway.
//!
//! The gateway never owns entity data. It reads tokens, permission codes and
//! user records through these traits; any backing store (SQL, in-memory, a
//! remote service) can sit behind them.

use async_trait::async_trait;
use thiserror::Error;

use crate::identity::{Permissions, UserId};
use crate::token::{TokenHash, TokenRecord, TokenScope};

/// Error returned by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or failed internally.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A record violated a store constraint.
    #[error("store constraint violated: {0}")]
    Constraint(String),
}

impl StoreError {
    /// Creates an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    /// Creates a constraint error.
    pub fn constraint(reason: impl Into<String>) -> Self {
        Self::Constraint(reason.into())
    }
}

/// Read access to issued tokens.
#[async_trait]
pub trait TokenStore: Send + Sync + 'static {
    /// Finds a token with the given hash and scope that has not expired.
    ///
    /// Returns `Ok(None)` when no such token exists.
    async fn find_active_token(
        &self,
        hash: &TokenHash,
        scope: TokenScope,
    ) -> Result<Option<TokenRecord>, StoreError>;
}

/// Read access to granted permission codes.
#[async_trait]
pub trait PermissionStore: Send + Sync + 'static {
    /// Returns every code granted to `user_id` (possibly empty).
    async fn permissions_for(&self, user_id: UserId) -> Result<Permissions, StoreError>;
}

/// The parts of a user record the gateway cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// The user's ID.
    pub id: UserId,
    /// Whether the account has been activated.
    pub activated: bool,
}

/// Read access to user existence and activation.
#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Looks up a user by ID.
    async fn find_user(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError>;
}
