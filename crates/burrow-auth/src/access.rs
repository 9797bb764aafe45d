//! Shared-secret access controller

use crate::password::{hash_credential, verify_credential, CredentialError};
use tracing::{debug, error};

/// Verifies credentials presented by agent connections
///
/// Implement this trait to plug a different credential scheme into the
/// session registry. Verification failure is an ordinary `false`, not an error.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, candidate: &str) -> bool;
}

/// Holds the Argon2id digest of the relay's access token
#[derive(Clone)]
pub struct AccessController {
    digest: String,
}

impl AccessController {
    /// Hash `secret` once and keep only the digest
    pub fn new(secret: &str) -> Result<Self, CredentialError> {
        let digest = hash_credential(secret)?;
        debug!("Access token hashed");
        Ok(Self { digest })
    }

    /// Use an already computed PHC digest (e.g. from `burrow hash-token`)
    pub fn from_digest(digest: impl Into<String>) -> Result<Self, CredentialError> {
        let digest = digest.into();
        argon2::PasswordHash::new(&digest)
            .map_err(|e| CredentialError::InvalidHashFormat(e.to_string()))?;
        Ok(Self { digest })
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl CredentialVerifier for AccessController {
    fn verify(&self, candidate: &str) -> bool {
        if candidate.is_empty() {
            return false;
        }
        match verify_credential(candidate, &self.digest) {
            Ok(matched) => matched,
            Err(e) => {
                error!("Access token verification failed: {}", e);
                false
            }
        }
    }
}

impl std::fmt::Debug for AccessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessController").finish_non_exhaustive()
    }
}
