/// Refresh Token Generation
///
/// Refresh tokens are:
/// - Cryptographically secure random 64-character alphanumeric strings (~381 bits)
/// - Hashed with SHA-256 before storage (the plaintext is never stored or logged)
/// - Single-use: every successful rotation claims the presented token

use std::fmt;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};

const REFRESH_TOKEN_LENGTH: usize = 64;

/// The plaintext secret handed to the client. `Debug` never prints it.
#[derive(Clone, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct RefreshSecret(String);

impl RefreshSecret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RefreshSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshSecret([redacted])")
    }
}

/// A freshly generated secret together with its storage hash
#[derive(Debug, Clone)]
pub struct GeneratedRefreshToken {
    pub secret: RefreshSecret,
    pub hash: String,
}

/// Generate a new cryptographically secure refresh token
pub fn generate_refresh_token() -> GeneratedRefreshToken {
    let secret: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFRESH_TOKEN_LENGTH)
        .map(char::from)
        .collect();
    let hash = hash_token(&secret);

    GeneratedRefreshToken {
        secret: RefreshSecret(secret),
        hash,
    }
}

/// Cheap shape check before touching storage. Anything that could not have
/// come from `generate_refresh_token` is rejected.
pub fn is_well_formed_refresh_token(token: &str) -> bool {
    token.len() == REFRESH_TOKEN_LENGTH && token.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Hash a refresh token using SHA-256, hex encoded
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
