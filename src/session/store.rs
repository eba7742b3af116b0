//! Persistence contracts for sessions and users.
//!
//! `claim_refresh_token` is the one operation that must be a single
//! indivisible conditional write: it is how two racing rotations of the same
//! token are told apart, with no read-then-write window in between.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::session::models::{Delegation, NewRefreshToken, RefreshTokenRecord};
use crate::users::User;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_delegation(
        &self,
        user_id: Uuid,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Delegation, StoreError>;

    async fn get_delegation(&self, id: Uuid) -> Result<Option<Delegation>, StoreError>;

    /// Set `revoked_at` if it is not already set. Revoking twice is a no-op.
    async fn revoke_delegation(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn touch_delegation(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// # Errors
    /// `StoreError::DuplicateHash` if the hash already exists
    async fn insert_refresh_token(
        &self,
        token: NewRefreshToken,
    ) -> Result<RefreshTokenRecord, StoreError>;

    async fn find_refresh_token_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Flip `is_used` false→true for `hash` only if it is currently false.
    /// Returns whether this call performed the flip.
    async fn claim_refresh_token(&self, hash: &str, at: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// Clamp `expires_at` of every record in the delegation to `at`.
    async fn expire_all_tokens_in_delegation(
        &self,
        delegation_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Revoke the delegation and expire all of its tokens as one unit.
    /// Either both changes commit or neither does.
    async fn revoke_delegation_cascade(
        &self,
        delegation_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Read-only user lookups needed by login
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
}
