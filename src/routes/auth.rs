/// Authentication Routes
///
/// Login, token refresh, logout, and current user information.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::{verify_against_dummy, verify_password};
use crate::error::{AppError, AuthError, ErrorContext};
use crate::middleware::AuthenticatedUser;
use crate::startup::AppState;

/// User login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Refresh and logout requests carry the refresh token in the body
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// User information response
#[derive(Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub is_verified: bool,
}

/// POST /auth/login
///
/// Authenticate with email and password and start a new session.
///
/// # Errors
/// - 401: Invalid credentials (unknown email, wrong password, unverified account)
/// - 503: Storage temporarily unavailable
///
/// # Security Notes
/// - Unknown emails are verified against a dummy hash so every failure costs
///   one bcrypt verification and returns the same error
pub async fn login(
    form: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");
    let LoginRequest { email, password } = form.into_inner();

    let user = state
        .users
        .find_user_by_email(&email)
        .await?
        .filter(|user| user.is_verified);
    let (user_id, stored_hash) = match user {
        Some(user) => (Some(user.id), Some(user.password_hash)),
        None => (None, None),
    };

    web::block(move || match stored_hash {
        Some(hash) => verify_password(&hash, &password),
        None => verify_against_dummy(&password),
    })
    .await
    .map_err(|e| AppError::Internal(format!("Password verification task failed: {}", e)))?
    .map_err(|e| {
        context.log_error(&e);
        e
    })?;
    let user_id = user_id.ok_or(AuthError::InvalidCredentials)?;

    let issued = state.engine.login(user_id).await?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %user_id,
        "User logged in successfully"
    );

    Ok(HttpResponse::Ok().json(issued))
}

/// POST /auth/refresh
///
/// Exchange a refresh token for a new access token and a new refresh token.
/// The presented token is spent; presenting it again revokes the session.
///
/// # Errors
/// - 401: Please log in again (invalid, expired, reused, or revoked)
/// - 503: Try again later
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let issued = state.engine.rotate(&form.refresh_token).await?;
    Ok(HttpResponse::Ok().json(issued))
}

/// POST /auth/logout
///
/// Revoke the session the refresh token belongs to.
///
/// # Errors
/// - 401: Token is not the live token of an active session
/// - 503: Revocation did not complete; retry
pub async fn logout(
    form: web::Json<RefreshRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.engine.logout(&form.refresh_token).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// GET /api/me
///
/// **Requires valid access token** in the Authorization header.
pub async fn get_current_user(
    user: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = state
        .users
        .find_user_by_id(user.user_id)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    Ok(HttpResponse::Ok().json(UserResponse {
        id: user.id.to_string(),
        email: user.email,
        is_verified: user.is_verified,
    }))
}
