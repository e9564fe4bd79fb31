//! Bearer credentials.
//!
//! A [`PlaintextToken`] is only ever shown to its owner once, at issue time.
//! Stores keep the SHA-256 [`TokenHash`] of it, so a leaked store does not
//! expose usable credentials.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::identity::UserId;

/// Length of an encoded plaintext token.
pub const TOKEN_PLAINTEXT_LEN: usize = 24;

/// Random bytes behind each token.
const TOKEN_ENTROPY_BYTES: usize = 18;

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    /// Authenticates API requests.
    Authentication,
    /// Activates a freshly registered account.
    Activation,
}

impl TokenScope {
    /// Returns the scope name as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Activation => "activation",
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plaintext bearer token.
///
/// `Debug` output is redacted.
///
/// # Example
///
/// ```
/// use cinegate_core::{PlaintextToken, TOKEN_PLAINTEXT_LEN};
///
/// let token = PlaintextToken::generate();
/// assert_eq!(token.as_str().len(), TOKEN_PLAINTEXT_LEN);
/// assert!(PlaintextToken::parse(token.as_str()).is_some());
/// assert!(PlaintextToken::parse("too-short").is_none());
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct PlaintextToken(String);

impl PlaintextToken {
    /// Generates a new random token from the OS random source.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Parses a presented token, rejecting anything that could not have been
    /// produced by [`PlaintextToken::generate`].
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let well_formed = value.len() == TOKEN_PLAINTEXT_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        well_formed.then(|| Self(value.to_string()))
    }

    /// Returns the token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the one-way hash used for storage and lookup.
    #[must_use]
    pub fn hash(&self) -> TokenHash {
        TokenHash::of(&self.0)
    }
}

impl fmt::Debug for PlaintextToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlaintextToken(<redacted>)")
    }
}

/// SHA-256 hash of a plaintext token.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenHash([u8; 32]);

impl TokenHash {
    /// Hashes a plaintext value.
    #[must_use]
    pub fn of(plaintext: &str) -> Self {
        Self(Sha256::digest(plaintext.as_bytes()).into())
    }

    /// Returns the raw digest.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenHash(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        f.write_str("…)")
    }
}

/// A stored token as returned by a [`TokenStore`](crate::TokenStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    /// Hash of the plaintext.
    pub hash: TokenHash,
    /// Owner of the token.
    pub user_id: UserId,
    /// What the token may be used for.
    pub scope: TokenScope,
    /// The instant the token stops being valid.
    pub expiry: DateTime<Utc>,
}

impl TokenRecord {
    /// Generates a new token for `user_id`, valid for `ttl`.
    ///
    /// Returns the plaintext (to hand to the user) alongside the record (to
    /// store).
    #[must_use]
    pub fn issue(user_id: UserId, ttl: Duration, scope: TokenScope) -> (PlaintextToken, Self) {
        let plaintext = PlaintextToken::generate();
        let record = Self {
            hash: plaintext.hash(),
            user_id,
            scope,
            expiry: Utc::now() + ttl,
        };
        (plaintext, record)
    }

    /// Returns `true` if the token is usable for `scope` at `now`.
    #[must_use]
    pub fn is_active(&self, scope: TokenScope, now: DateTime<Utc>) -> bool {
        self.scope == scope && now < self.expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_unique_and_parse() {
        let a = PlaintextToken::generate();
        let b = PlaintextToken::generate();
        assert_ne!(a, b);
        assert_eq!(PlaintextToken::parse(a.as_str()), Some(a));
    }

    #[test]
    fn test_parse_rejects_wrong_length_and_alphabet() {
        assert!(PlaintextToken::parse("").is_none());
        assert!(PlaintextToken::parse("abc").is_none());
        assert!(PlaintextToken::parse("aaaaaaaaaaaaaaaaaaaaaaaaa").is_none());
        assert!(PlaintextToken::parse("aaaaaaaaaaaaaaaaaaaaaa+/").is_none());
        assert!(PlaintextToken::parse("aaaaaaaaaaaaaaaaaaaaaa-_").is_some());
    }

    #[test]
    fn test_hash_is_deterministic_sha256() {
        let hash = TokenHash::of("abc");
        assert_eq!(hash, TokenHash::of("abc"));
        assert_ne!(hash, TokenHash::of("abd"));
        // Well-known SHA-256("abc") prefix.
        assert_eq!(&hash.as_bytes()[..4], &[0xba, 0x78, 0x16, 0xbf]);
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let token = PlaintextToken::generate();
        let debug = format!("{token:?}");
        assert!(!debug.contains(token.as_str()));
        assert_eq!(format!("{:?}", TokenHash::of("abc")), "TokenHash(ba7816bf…)");
    }

    #[test]
    fn test_record_activity_checks_scope_and_expiry() {
        let (plaintext, record) =
            TokenRecord::issue(UserId::new(1), Duration::hours(1), TokenScope::Authentication);
        assert_eq!(record.hash, plaintext.hash());

        let now = Utc::now();
        assert!(record.is_active(TokenScope::Authentication, now));
        assert!(!record.is_active(TokenScope::Activation, now));
        assert!(!record.is_active(TokenScope::Authentication, record.expiry));
        assert!(!record.is_active(TokenScope::Authentication, now + Duration::hours(2)));
    }

    #[test]
    fn test_scope_names() {
        assert_eq!(TokenScope::Authentication.to_string(), "authentication");
        assert_eq!(
            serde_json::to_string(&TokenScope::Activation).unwrap(),
            r#""activation""#
        );
    }
}
