//! Caller identity and permission codes.
//!
//! An [`Identity`] is resolved once per request by the authentication stage.
//! Permissions are flat string codes such as `movies:read`; matching is exact
//! set membership with no wildcards or hierarchy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Wraps a raw user ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw ID.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A set of permission codes.
///
/// # Example
///
/// ```
/// use cinegate_core::Permissions;
///
/// let perms = Permissions::from_codes(["movies:read", "movies:write"]);
/// assert!(perms.includes("movies:read"));
/// assert!(!perms.includes("movies:*"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(BTreeSet<String>);

impl Permissions {
    /// Creates an empty permission set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from an iterator of codes.
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(codes.into_iter().map(Into::into).collect())
    }

    /// Returns `true` if `code` is in the set.
    #[must_use]
    pub fn includes(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    /// Adds a code to the set.
    pub fn insert(&mut self, code: impl Into<String>) {
        self.0.insert(code.into());
    }

    /// Number of codes in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the set holds no codes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the codes in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// An authenticated user as seen by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// The user's ID.
    pub user_id: UserId,
    /// Permission codes granted to the user.
    pub permissions: Permissions,
    /// Whether the account has been activated.
    pub activated: bool,
}

impl AuthenticatedUser {
    /// Creates an activated user with the given permissions.
    #[must_use]
    pub fn new(user_id: UserId, permissions: Permissions) -> Self {
        Self {
            user_id,
            permissions,
            activated: true,
        }
    }

    /// Sets the activation flag.
    #[must_use]
    pub fn with_activated(mut self, activated: bool) -> Self {
        self.activated = activated;
        self
    }
}

/// The identity attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Identity {
    /// No credential was presented.
    #[default]
    Anonymous,
    /// A valid bearer credential was presented.
    User(AuthenticatedUser),
}

impl Identity {
    /// Returns `true` for [`Identity::Anonymous`].
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// Returns the user ID, if authenticated.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::User(user) => Some(user.user_id),
            Self::Anonymous => None,
        }
    }

    /// Returns `true` if the identity holds `code`. Anonymous holds nothing.
    #[must_use]
    pub fn has_permission(&self, code: &str) -> bool {
        match self {
            Self::User(user) => user.permissions.includes(code),
            Self::Anonymous => false,
        }
    }

    /// A short identifier for log lines. Never contains credentials.
    #[must_use]
    pub fn log_id(&self) -> String {
        match self {
            Self::User(user) => format!("user:{}", user.user_id),
            Self::Anonymous => "anonymous".to_string(),
        }
    }
}
