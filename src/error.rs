/// Error Handling Module
///
/// Unified error handling for the session service:
/// 1. Domain-specific error types (credentials, access tokens, sessions, storage)
/// 2. A single `AppError` used for control flow in handlers
/// 3. HTTP response mapping with structured, non-leaking bodies
/// 4. Structured error logging with context
///
/// Callers only ever learn one of two things about a failed session operation:
/// "log in again" or "try again later". The specific condition is logged.

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use uuid::Uuid;

/// ============================================================================
/// 1. DOMAIN-SPECIFIC ERROR TYPES
/// ============================================================================

/// Reasons an access token was rejected by the minter
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AccessTokenError {
    #[error("access token has expired")]
    Expired,
    #[error("access token signature is invalid")]
    BadSignature,
    #[error("access token issuer mismatch")]
    BadIssuer,
    #[error("access token audience mismatch")]
    BadAudience,
    #[error("access token is malformed")]
    Malformed,
}

/// Authentication errors at the transport boundary
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Missing authentication token")]
    MissingToken,
    #[error("Invalid access token: {0}")]
    AccessToken(#[from] AccessTokenError),
}

/// Persistence collaborator errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Two refresh tokens hashed to the same value
    #[error("refresh token hash already exists")]
    DuplicateHash,
    /// The delegation already holds an unused refresh token
    #[error("session already has a current refresh token")]
    CurrentTokenExists,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

/// Partial unique index allowing one unused token per delegation
const CURRENT_TOKEN_CONSTRAINT: &str = "refresh_tokens_one_current_per_delegation";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                if db_err.constraint() == Some(CURRENT_TOKEN_CONSTRAINT) {
                    StoreError::CurrentTokenExists
                } else {
                    StoreError::DuplicateHash
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            _ => StoreError::Database(err),
        }
    }
}

/// Session lifecycle errors produced by the rotation engine
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Unknown or malformed refresh token. Deliberately carries no detail.
    #[error("invalid refresh token")]
    InvalidToken,
    #[error("refresh token has expired")]
    TokenExpired,
    #[error("refresh token reuse detected")]
    TokenReuseDetected,
    #[error("session has been revoked")]
    SessionRevoked,
    #[error("failed to mint access token: {0}")]
    Mint(String),
    #[error("failed to generate refresh token: {0}")]
    TokenGeneration(String),
    #[error("persistence failure: {0}")]
    Persistence(#[source] StoreError),
    /// Delegation revocation did not commit; the caller must retry it.
    #[error("revocation of session {delegation_id} is incomplete: {source}")]
    RevocationIncomplete {
        delegation_id: Uuid,
        #[source]
        source: StoreError,
    },
}

impl SessionError {
    /// The client must discard its tokens and authenticate again.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidToken
                | SessionError::TokenExpired
                | SessionError::TokenReuseDetected
                | SessionError::SessionRevoked
        )
    }

    /// Storage-level fault; the caller may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::Persistence(_) | SessionError::RevocationIncomplete { .. }
        )
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateHash => {
                SessionError::TokenGeneration("refresh token hash collision".to_string())
            }
            other => SessionError::Persistence(other),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
    #[error("Config load error: {0}")]
    Load(#[from] config::ConfigError),
}

/// ============================================================================
/// 2. UNIFIED APPLICATION ERROR TYPE
/// ============================================================================

/// Central error type that all handler errors map to
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AccessTokenError> for AppError {
    fn from(err: AccessTokenError) -> Self {
        AppError::Auth(AuthError::AccessToken(err))
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Error response structure for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Unique error ID for correlating with server logs
    pub error_id: String,
    pub message: String,
    /// Error code for client-side handling
    pub code: String,
    pub status: u16,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: String, status: u16) -> Self {
        Self {
            error_id,
            message,
            code,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Trait for converting errors to HTTP responses with proper logging
pub trait ErrorHandler {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse);
    fn log_error(&self, request_id: &str);
}

const REAUTHENTICATE: (&str, &str) = ("REAUTHENTICATE", "Please log in again");
const TRY_AGAIN: (&str, &str) = ("TRY_AGAIN", "Temporary failure, please try again");
const INTERNAL: (&str, &str) = ("INTERNAL_ERROR", "Internal server error");

impl AppError {
    fn classify(&self) -> (StatusCode, &'static str, &'static str) {
        match self {
            AppError::Auth(AuthError::InvalidCredentials) => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "Invalid email or password",
            ),
            AppError::Auth(AuthError::MissingToken) => (
                StatusCode::UNAUTHORIZED,
                "MISSING_TOKEN",
                "Missing or invalid authorization header",
            ),
            AppError::Auth(AuthError::AccessToken(_)) => (
                StatusCode::UNAUTHORIZED,
                "TOKEN_INVALID",
                "Invalid or expired token",
            ),
            AppError::Session(e) if e.requires_reauthentication() => {
                (StatusCode::UNAUTHORIZED, REAUTHENTICATE.0, REAUTHENTICATE.1)
            }
            AppError::Session(e) if e.is_transient() => {
                (StatusCode::SERVICE_UNAVAILABLE, TRY_AGAIN.0, TRY_AGAIN.1)
            }
            AppError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, TRY_AGAIN.0, TRY_AGAIN.1),
            AppError::Session(_) | AppError::Config(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL.0, INTERNAL.1)
            }
        }
    }
}

impl ErrorHandler for AppError {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse) {
        let (status, code, message) = self.classify();

        let error_response = ErrorResponse::new(
            request_id.to_string(),
            message.to_string(),
            code.to_string(),
            status.as_u16(),
        );

        (status, error_response)
    }

    fn log_error(&self, request_id: &str) {
        match self {
            AppError::Auth(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Authentication error");
            }
            AppError::Session(e) if e.requires_reauthentication() => {
                tracing::warn!(request_id = request_id, error = %e, "Session rejected");
            }
            AppError::Session(e) => {
                tracing::error!(request_id = request_id, error = %e, "Session engine fault");
            }
            AppError::Store(e) => {
                tracing::error!(request_id = request_id, error = %e, "Storage error");
            }
            AppError::Config(e) => {
                tracing::error!(request_id = request_id, error = %e, "Configuration error");
            }
            AppError::Internal(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Internal error");
            }
        }
    }
}

/// Implement ResponseError for Actix-web integration
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let request_id = Uuid::new_v4().to_string();
        self.log_error(&request_id);

        let (status, error_response) = <Self as ErrorHandler>::error_response(self, &request_id);

        HttpResponse::build(status).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        self.classify().0
    }
}

// ============================================================================
// 4. ERROR CONTEXT ENRICHMENT
// ============================================================================

/// Error context for enhanced logging and debugging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub user_id: Option<String>,
    pub operation: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            user_id: None,
            operation: operation.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_user_id(mut self, user_id: String) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn log_error(&self, error: &AppError) {
        let context = serde_json::json!({
            "request_id": self.request_id,
            "operation": self.operation,
            "user_id": self.user_id,
            "timestamp": self.timestamp.to_rfc3339(),
        });

        match error {
            AppError::Auth(_) => {
                tracing::warn!(error = %error, context = ?context, "Authentication error");
            }
            AppError::Session(e) if e.requires_reauthentication() => {
                tracing::warn!(error = %error, context = ?context, "Session rejected");
            }
            _ => {
                tracing::error!(error = %error, context = ?context, "Request failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_terminal_errors_share_one_response() {
        let terminal = [
            SessionError::InvalidToken,
            SessionError::TokenExpired,
            SessionError::TokenReuseDetected,
            SessionError::SessionRevoked,
        ];

        for err in terminal {
            let app_err = AppError::from(err);
            let (status, body) = ErrorHandler::error_response(&app_err, "req-1");
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body.code, "REAUTHENTICATE");
            assert_eq!(body.message, "Please log in again");
        }
    }

    #[test]
    fn test_persistence_errors_are_transient() {
        let err = SessionError::Persistence(StoreError::Unavailable("down".to_string()));
        assert!(err.is_transient());
        assert!(!err.requires_reauthentication());

        let app_err = AppError::from(err);
        assert_eq!(app_err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let incomplete = SessionError::RevocationIncomplete {
            delegation_id: Uuid::new_v4(),
            source: StoreError::Unavailable("down".to_string()),
        };
        assert!(incomplete.is_transient());
    }

    #[test]
    fn test_duplicate_hash_is_generation_fault() {
        let err = SessionError::from(StoreError::DuplicateHash);
        assert!(matches!(err, SessionError::TokenGeneration(_)));
        assert!(!err.is_transient());
        assert_eq!(
            AppError::from(err).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_mint_error_is_internal_fault() {
        let err = AppError::from(SessionError::Mint("bad key".to_string()));
        let (status, body) = ErrorHandler::error_response(&err, "req-2");
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, "INTERNAL_ERROR");
        assert!(!body.message.contains("bad key"));
    }

    #[test]
    fn test_access_token_error_conversion() {
        let app_err: AppError = AccessTokenError::Expired.into();
        match app_err {
            AppError::Auth(AuthError::AccessToken(AccessTokenError::Expired)) => (),
            _ => panic!("Expected access token error"),
        }
        assert_eq!(
            AppError::from(AccessTokenError::BadSignature).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_error_context_creation() {
        let ctx = ErrorContext::new("token_refresh");
        assert_eq!(ctx.operation, "token_refresh");
        assert!(ctx.user_id.is_none());

        let ctx_with_user = ctx.with_user_id("user-123".to_string());
        assert_eq!(ctx_with_user.user_id, Some("user-123".to_string()));
    }
}
