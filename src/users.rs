//! User accounts as seen by the session service. Read-only here.

use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub is_verified: bool,
}

/// Emails are compared case-insensitively, trimmed.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
