//! Argon2id password hashes in PHC string format.
//!
//! Both operations are CPU-bound; async callers run them on the blocking pool.

use super::DirectoryError;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use once_cell::sync::Lazy;
use secrecy::{ExposeSecret, SecretString};

/// Hash with the same parameters as stored ones, checked when no account matches
/// so that unknown identifiers cost as much as known ones.
static DECOY_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash_password(&SecretString::from("decoy-password-never-stored")).ok());

/// # Errors
/// Returns [`DirectoryError::Hash`] if hashing fails.
pub fn hash_password(password: &SecretString) -> Result<String, DirectoryError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| DirectoryError::Hash(err.to_string()))
}

/// `false` for a wrong password and for a hash that does not parse.
#[must_use]
pub fn verify_password(hash: &str, password: &SecretString) -> bool {
    PasswordHash::new(hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.expose_secret().as_bytes(), &parsed)
            .is_ok()
    })
}

/// [`hash_password`] on the blocking pool.
///
/// # Errors
/// Returns [`DirectoryError::Hash`] if hashing fails or the task is lost.
pub async fn hash_password_blocking(password: SecretString) -> Result<String, DirectoryError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|err| DirectoryError::Hash(err.to_string()))?
}

/// [`verify_password`] on the blocking pool.
///
/// # Errors
/// Returns [`DirectoryError::Hash`] if the task is lost.
pub async fn verify_password_blocking(
    hash: String,
    password: SecretString,
) -> Result<bool, DirectoryError> {
    tokio::task::spawn_blocking(move || verify_password(&hash, &password))
        .await
        .map_err(|err| DirectoryError::Hash(err.to_string()))
}

/// Run a full verification against [`DECOY_HASH`] and discard the result.
pub async fn verify_decoy(password: SecretString) {
    let result = tokio::task::spawn_blocking(move || {
        DECOY_HASH
            .as_deref()
            .map(|hash| verify_password(hash, &password))
    })
    .await;
    if let Ok(None) = result {
        tracing::warn!("decoy password hash unavailable");
    }
}
