//! Password hashing with Argon2id.
//!
//! Hashes are stored as PHC strings, which carry their own salt and
//! parameters. Hashing and verification are CPU-bound and run on the blocking
//! thread pool so they never stall the request executor.

use std::fmt;

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::RngCore;
use thiserror::Error;

/// Failure while hashing or checking a password.
#[derive(Error, Debug)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("stored password hash is unreadable: {0}")]
    CorruptHash(String),

    #[error("password task did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// PHC-formatted Argon2id hash of a user's password.
#[derive(Clone, PartialEq, Eq)]
pub struct HashedPassword(String);

impl HashedPassword {
    /// Hash `plaintext` with a fresh random salt.
    pub async fn from_plaintext(plaintext: String) -> Result<Self, PasswordError> {
        tokio::task::spawn_blocking(move || {
            let mut salt = [0u8; 16];
            rand::rng().fill_bytes(&mut salt);
            let salt = SaltString::encode_b64(&salt).map_err(|e| PasswordError::Hash(e.to_string()))?;

            Argon2::default()
                .hash_password(plaintext.as_bytes(), &salt)
                .map(|hash| Self(hash.to_string()))
                .map_err(|e| PasswordError::Hash(e.to_string()))
        })
        .await?
    }

    /// Wrap a hash read back from storage.
    pub fn from_phc(phc: impl Into<String>) -> Self {
        Self(phc.into())
    }

    pub fn as_phc(&self) -> &str {
        &self.0
    }

    /// Whether `plaintext` is the password this hash was made from.
    pub async fn matches(&self, plaintext: String) -> Result<bool, PasswordError> {
        let phc = self.0.clone();
        tokio::task::spawn_blocking(move || {
            let parsed =
                PasswordHash::new(&phc).map_err(|e| PasswordError::CorruptHash(e.to_string()))?;
            Ok(Argon2::default()
                .verify_password(plaintext.as_bytes(), &parsed)
                .is_ok())
        })
        .await?
    }
}

// Hashes stay out of logs.
impl fmt::Debug for HashedPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HashedPassword(..)")
    }
}
