//! Credential hashing and verification using Argon2id

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use thiserror::Error;

/// Error types for credential operations
#[derive(Error, Debug)]
pub enum CredentialError {
    /// The configured secret is empty
    #[error("Access token must not be empty")]
    Empty,

    /// Failed to hash the secret
    #[error("Failed to hash access token: {0}")]
    HashingFailed(String),

    /// Failed to verify a candidate
    #[error("Failed to verify access token: {0}")]
    VerificationFailed(String),

    /// Stored digest is not a valid PHC string
    #[error("Invalid access token hash format: {0}")]
    InvalidHashFormat(String),
}

/// Hash a secret using Argon2id with a random 16-byte salt
///
/// # Returns
/// * `Ok(String)` - PHC-formatted digest (`$argon2id$v=19$...`)
/// * `Err(CredentialError)` - If the secret is empty or hashing fails
///
/// # Example
/// ```
/// use burrow_auth::password::hash_credential;
///
/// let digest = hash_credential("s3cret-agent-token").unwrap();
/// assert!(digest.starts_with("$argon2id$"));
/// ```
pub fn hash_credential(secret: &str) -> Result<String, CredentialError> {
    if secret.is_empty() {
        return Err(CredentialError::Empty);
    }

    let salt = SaltString::generate(&mut OsRng);

    let digest = Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| CredentialError::HashingFailed(e.to_string()))?;

    Ok(digest.to_string())
}

/// Verify a candidate against a PHC digest
///
/// The digest comparison inside argon2 is constant-time.
///
/// # Returns
/// * `Ok(true)` - Candidate matches
/// * `Ok(false)` - Candidate does not match
/// * `Err(CredentialError)` - If the digest is malformed or verification fails
pub fn verify_credential(candidate: &str, digest: &str) -> Result<bool, CredentialError> {
    let parsed =
        PasswordHash::new(digest).map_err(|e| CredentialError::InvalidHashFormat(e.to_string()))?;

    match Argon2::default().verify_password(candidate.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(CredentialError::VerificationFailed(e.to_string())),
    }
}
