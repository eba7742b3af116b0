//! Postgres-backed session store (`delegations` and `refresh_tokens` tables).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::session::models::{Delegation, NewRefreshToken, RefreshTokenRecord};
use crate::session::store::{SessionStore, UserStore};
use crate::users::{normalize_email, User};

const DELEGATION_COLUMNS: &str = "id, user_id, created_at, expires_at, revoked_at, last_used_at";

const TOKEN_COLUMNS: &str = "id, token_hash, user_id, delegation_id, created_at, expires_at, \
                             is_used, used_at";

const REVOKE_DELEGATION: &str =
    "UPDATE delegations SET revoked_at = $2 WHERE id = $1 AND revoked_at IS NULL";

const EXPIRE_TOKENS: &str =
    "UPDATE refresh_tokens SET expires_at = $2 WHERE delegation_id = $1 AND expires_at > $2";

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_delegation(
        &self,
        user_id: Uuid,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Delegation, StoreError> {
        let query = format!(
            "INSERT INTO delegations (id, user_id, created_at, expires_at, last_used_at)
             VALUES ($1, $2, $3, $4, $3)
             RETURNING {DELEGATION_COLUMNS}"
        );
        let delegation = sqlx::query_as::<_, Delegation>(&query)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(created_at)
            .bind(expires_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(delegation)
    }

    async fn get_delegation(&self, id: Uuid) -> Result<Option<Delegation>, StoreError> {
        let query = format!("SELECT {DELEGATION_COLUMNS} FROM delegations WHERE id = $1");
        let delegation = sqlx::query_as::<_, Delegation>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(delegation)
    }

    async fn revoke_delegation(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(REVOKE_DELEGATION)
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch_delegation(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE delegations SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_refresh_token(
        &self,
        token: NewRefreshToken,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let query = format!(
            "INSERT INTO refresh_tokens (id, token_hash, user_id, delegation_id, created_at, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {TOKEN_COLUMNS}"
        );
        // A unique violation on token_hash surfaces as StoreError::DuplicateHash
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&query)
            .bind(Uuid::new_v4())
            .bind(&token.token_hash)
            .bind(token.user_id)
            .bind(token.delegation_id)
            .bind(token.created_at)
            .bind(token.expires_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(record)
    }

    async fn find_refresh_token_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let query = format!("SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE token_hash = $1");
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&query)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn claim_refresh_token(
        &self,
        hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET is_used = true, used_at = $2
             WHERE token_hash = $1 AND is_used = false",
        )
        .bind(hash)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn expire_all_tokens_in_delegation(
        &self,
        delegation_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(EXPIRE_TOKENS)
            .bind(delegation_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke_delegation_cascade(
        &self,
        delegation_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(REVOKE_DELEGATION)
            .bind(delegation_id)
            .bind(at)
            .execute(&mut tx)
            .await?;
        sqlx::query(EXPIRE_TOKENS)
            .bind(delegation_id)
            .bind(at)
            .execute(&mut tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgSessionStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, is_verified FROM users WHERE email = $1",
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, is_verified FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}
