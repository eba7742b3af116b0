/// Access Token Minting and Validation
///
/// Issues HS256-signed access tokens and validates them. Signature, issuer and
/// audience are checked by `jsonwebtoken`; time-based claims are checked
/// against the injected [`Clock`] with zero leeway, so tests can drive expiry.

use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::Claims;
use crate::clock::Clock;
use crate::configuration::JwtSettings;
use crate::error::{AccessTokenError, SessionError};

const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Clone)]
pub struct AccessTokenMinter {
    config: JwtSettings,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl AccessTokenMinter {
    pub fn new(config: JwtSettings, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        validation.set_issuer(&[&config.issuer]);
        validation.set_audience(config.audience.as_slice());
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        // exp/nbf are checked against the injected clock in `decode_claims`
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            config,
            validation,
            clock,
        }
    }

    /// Access token lifetime in seconds
    pub fn ttl(&self) -> i64 {
        self.config.access_token_expiry
    }

    /// Mint a new access token for a user
    ///
    /// # Errors
    /// Returns `SessionError::Mint` if signing fails
    pub fn mint(&self, user_id: Uuid) -> Result<String, SessionError> {
        let claims = Claims::new(user_id, &self.config, self.clock.now());

        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!(error = %e, "Access token signing failed");
            SessionError::Mint(e.to_string())
        })
    }

    /// Validate a token and return the user id it was issued to
    pub fn validate(&self, token: &str) -> Result<Uuid, AccessTokenError> {
        self.decode_claims(token)?.user_id()
    }

    /// Validate a token and return its full claim set
    pub fn decode_claims(&self, token: &str) -> Result<Claims, AccessTokenError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let reason = match e.kind() {
                    ErrorKind::InvalidSignature => AccessTokenError::BadSignature,
                    ErrorKind::InvalidIssuer => AccessTokenError::BadIssuer,
                    ErrorKind::InvalidAudience => AccessTokenError::BadAudience,
                    ErrorKind::ExpiredSignature => AccessTokenError::Expired,
                    _ => AccessTokenError::Malformed,
                };
                tracing::warn!(error = %e, reason = %reason, "JWT validation error");
                reason
            })?;

        let now = self.clock.now();
        if claims.is_expired(now) {
            tracing::debug!(jti = %claims.jti, "Access token expired");
            return Err(AccessTokenError::Expired);
        }
        if claims.is_not_yet_valid(now) {
            tracing::warn!(jti = %claims.jti, "Access token used before nbf");
            return Err(AccessTokenError::Malformed);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, Utc};

    fn get_test_config() -> JwtSettings {
        JwtSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            issuer: "test".to_string(),
            audience: vec!["finance-app".to_string()],
            access_token_expiry: 3600,
            refresh_token_expiry: 604800,
            session_expiry: 2592000,
        }
    }

    fn minter(config: JwtSettings, clock: Arc<ManualClock>) -> AccessTokenMinter {
        AccessTokenMinter::new(config, clock)
    }

    #[test]
    fn test_generate_and_validate_token() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let minter = minter(get_test_config(), clock);
        let user_id = Uuid::new_v4();

        let token = minter.mint(user_id).expect("Failed to generate token");
        let claims = minter.decode_claims(&token).expect("Failed to validate token");

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.iss, "test");
        assert_eq!(minter.validate(&token), Ok(user_id));
    }

    #[test]
    fn test_invalid_token() {
        let minter = minter(get_test_config(), Arc::new(ManualClock::default()));

        assert_eq!(
            minter.validate("invalid.token.here"),
            Err(AccessTokenError::Malformed)
        );
    }

    #[test]
    fn test_wrong_secret_is_bad_signature() {
        let clock = Arc::new(ManualClock::default());
        let mut other = get_test_config();
        other.secret = "another-secret-key-at-least-32-characters".to_string();

        let token = minter(other, clock.clone()).mint(Uuid::new_v4()).unwrap();
        let result = minter(get_test_config(), clock).validate(&token);

        assert_eq!(result, Err(AccessTokenError::BadSignature));
    }

    #[test]
    fn test_tampered_token() {
        let minter = minter(get_test_config(), Arc::new(ManualClock::default()));
        let token = minter.mint(Uuid::new_v4()).expect("Failed to generate token");

        let tampered = format!("{}X", token);
        assert!(minter.validate(&tampered).is_err());
    }

    #[test]
    fn test_wrong_issuer() {
        let clock = Arc::new(ManualClock::default());
        let mut other = get_test_config();
        other.issuer = "wrong-issuer".to_string();

        let token = minter(other, clock.clone()).mint(Uuid::new_v4()).unwrap();
        let result = minter(get_test_config(), clock).validate(&token);

        assert_eq!(result, Err(AccessTokenError::BadIssuer));
    }

    #[test]
    fn test_wrong_audience() {
        let clock = Arc::new(ManualClock::default());
        let mut other = get_test_config();
        other.audience = vec!["someone-else".to_string()];

        let token = minter(other, clock.clone()).mint(Uuid::new_v4()).unwrap();
        let result = minter(get_test_config(), clock).validate(&token);

        assert_eq!(result, Err(AccessTokenError::BadAudience));
    }

    #[test]
    fn test_one_matching_audience_is_enough() {
        let clock = Arc::new(ManualClock::default());
        let mut issuing = get_test_config();
        issuing.audience = vec!["legacy-app".to_string(), "finance-app".to_string()];
        let user_id = Uuid::new_v4();

        let token = minter(issuing, clock.clone()).mint(user_id).unwrap();
        let result = minter(get_test_config(), clock).validate(&token);

        assert_eq!(result, Ok(user_id));
    }

    #[test]
    fn test_zero_ttl_token_is_expired_immediately() {
        let mut config = get_test_config();
        config.access_token_expiry = 0;
        let minter = minter(config, Arc::new(ManualClock::default()));

        let token = minter.mint(Uuid::new_v4()).unwrap();
        assert_eq!(minter.validate(&token), Err(AccessTokenError::Expired));
    }

    #[test]
    fn test_token_expires_with_clock() {
        let clock = Arc::new(ManualClock::default());
        let minter = minter(get_test_config(), clock.clone());
        let token = minter.mint(Uuid::new_v4()).unwrap();

        clock.advance(Duration::seconds(3599));
        assert!(minter.validate(&token).is_ok());

        clock.advance(Duration::seconds(1));
        assert_eq!(minter.validate(&token), Err(AccessTokenError::Expired));
    }

    #[test]
    fn test_token_from_the_future_is_rejected() {
        let clock = Arc::new(ManualClock::default());
        let minter = minter(get_test_config(), clock.clone());
        let token = minter.mint(Uuid::new_v4()).unwrap();

        clock.advance(Duration::seconds(-120));
        assert_eq!(minter.validate(&token), Err(AccessTokenError::Malformed));
    }
}
