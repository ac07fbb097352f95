//! Opaque bearer tokens.
//!
//! A token is 26 characters drawn from the RFC 4648 base-32 alphabet
//! (130 random bits). Only the SHA-256 digest of the plaintext is ever stored;
//! the plaintext is handed to the client once and hashed again on every
//! request before lookup.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Length of a token plaintext in characters.
pub const TOKEN_PLAINTEXT_LEN: usize = 26;

/// SHA-256 digest of a token plaintext.
pub type TokenDigest = [u8; 32];

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Activation,
    Authentication,
}

impl Scope {
    pub const fn as_str(self) -> &'static str {
        match self {
            Scope::Activation => "activation",
            Scope::Authentication => "authentication",
        }
    }

    /// How long a freshly issued token of this scope stays valid.
    pub fn lifetime(self) -> TimeDelta {
        match self {
            Scope::Activation => TimeDelta::days(3),
            Scope::Authentication => TimeDelta::hours(24),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A freshly issued token together with its stored record.
#[derive(Clone)]
pub struct Token {
    pub plaintext: String,
    pub hash: TokenDigest,
    pub user_id: i64,
    pub expiry: DateTime<Utc>,
    pub scope: Scope,
}

impl Token {
    /// Issue a new random token for `user_id`, valid for `ttl` from now.
    pub fn generate(user_id: i64, ttl: TimeDelta, scope: Scope) -> Self {
        let mut rng = rand::rng();
        let plaintext: String = (0..TOKEN_PLAINTEXT_LEN)
            .map(|_| base32_char(rng.random_range(0..32u8)))
            .collect();

        Self {
            hash: token_digest(&plaintext),
            plaintext,
            user_id,
            expiry: Utc::now() + ttl,
            scope,
        }
    }
}

// Keeps the plaintext out of logs.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("user_id", &self.user_id)
            .field("expiry", &self.expiry)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Digest used as the storage lookup key for a plaintext.
pub fn token_digest(plaintext: &str) -> TokenDigest {
    Sha256::digest(plaintext.as_bytes()).into()
}

/// Whether `value` has the shape of an issued token.
///
/// Lowercase letters are accepted so that clients which case-fold headers
/// still get a lookup; the digest is computed over the exact value sent.
pub fn is_token_shaped(value: &str) -> bool {
    value.len() == TOKEN_PLAINTEXT_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphabetic() || (b'2'..=b'7').contains(&b))
}

fn base32_char(value: u8) -> char {
    match value {
        0..=25 => char::from(b'A' + value),
        _ => char::from(b'2' + (value - 26) % 6),
    }
}
