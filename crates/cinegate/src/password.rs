//! Password hashing.
//!
//! Argon2id in PHC string form. Hashing and verification are CPU-bound,
//! so both run on the blocking pool.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{AppError, AppResult};

const SALT_LEN: usize = 16;

/// Shortest accepted password, in bytes.
pub const MIN_PASSWORD_BYTES: usize = 8;

/// Longest accepted password, in bytes.
pub const MAX_PASSWORD_BYTES: usize = 72;

/// Hashes `plaintext` with a fresh random salt.
pub async fn hash(plaintext: String) -> AppResult<String> {
    tokio::task::spawn_blocking(move || hash_blocking(&plaintext))
        .await
        .map_err(|err| AppError::Internal(format!("password hashing task failed: {err}")))?
}

/// Checks `plaintext` against a stored PHC string.
///
/// A malformed stored hash counts as a mismatch.
pub async fn verify(plaintext: String, stored: String) -> AppResult<bool> {
    tokio::task::spawn_blocking(move || verify_blocking(&plaintext, &stored))
        .await
        .map_err(|err| AppError::Internal(format!("password check task failed: {err}")))
}

fn hash_blocking(plaintext: &str) -> AppResult<String> {
    let mut bytes = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut bytes);
    let salt = SaltString::encode_b64(&bytes)
        .map_err(|err| AppError::Internal(format!("salt encoding failed: {err}")))?;
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::Internal(format!("password hashing failed: {err}")))
}

fn verify_blocking(plaintext: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        tracing::warn!("stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed)
        .is_ok()
}
