//! Access control for the tunnel upgrade endpoint
//!
//! The relay holds a single shared access token. It is hashed once at startup
//! and every agent connection attempt is verified against that digest.

pub mod access;
pub mod password;

pub use access::{AccessController, CredentialVerifier};
pub use password::{hash_credential, verify_credential, CredentialError};
