/// JWT Claims structure
///
/// Represents the payload of an access token: the subject (user id) plus the
/// registered claims from RFC 7519.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::configuration::JwtSettings;
use crate::error::AccessTokenError;

/// JWT Claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: Vec<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Not before (Unix timestamp)
    pub nbf: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Unique token id
    pub jti: String,
}

impl Claims {
    /// Create claims for `user_id`, issued at `now`
    pub fn new(user_id: Uuid, config: &JwtSettings, now: DateTime<Utc>) -> Self {
        let now = now.timestamp();
        Self {
            sub: user_id.to_string(),
            iss: config.issuer.clone(),
            aud: config.audience.clone(),
            iat: now,
            nbf: now,
            exp: now + config.access_token_expiry,
            jti: Uuid::new_v4().to_string(),
        }
    }

    /// Extract user ID from claims
    pub fn user_id(&self) -> Result<Uuid, AccessTokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| AccessTokenError::Malformed)
    }

    /// Expired once `now` reaches `exp`, with no leeway.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }

    pub fn is_not_yet_valid(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() < self.nbf
    }
}
