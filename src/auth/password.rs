/// Password Verification
///
/// bcrypt is slow and salted, and its comparison is constant-time. Verification
/// never retries; a mismatch is reported and the caller decides what to do.

use bcrypt::verify;

use crate::error::{AppError, AuthError};

/// A well-formed bcrypt hash that matches no password a user can send.
/// Verified against when the account is unknown so both paths cost the same.
const DUMMY_HASH: &str = "$2b$12$gSvqqUPvlXP2tfVFaWK1Be7DlH.PKZbv5H8KnzzVgXXbVxpva.pFm";

/// Verify a supplied password against a stored hash
///
/// # Errors
/// - `AuthError::InvalidCredentials` if the password does not match
/// - `AppError::Internal` if the stored hash is malformed
pub fn verify_password(stored_hash: &str, supplied_password: &str) -> Result<(), AppError> {
    let matches = verify(supplied_password, stored_hash)
        .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))?;

    if matches {
        Ok(())
    } else {
        Err(AuthError::InvalidCredentials.into())
    }
}

/// Burn the same amount of work as a real verification, then fail.
pub fn verify_against_dummy(supplied_password: &str) -> Result<(), AppError> {
    let _ = verify(supplied_password, DUMMY_HASH);
    Err(AuthError::InvalidCredentials.into())
}
