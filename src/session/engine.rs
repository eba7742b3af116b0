//! Rotation engine
//!
//! Issues a delegation plus its first refresh token on login, exchanges a
//! refresh token for a successor on every refresh, and treats any second
//! presentation of an already-claimed token as theft: the whole delegation is
//! revoked and every token in it expired.
//!
//! Token lifecycle:
//!
//! ```text
//! Active --claim--> Claimed --(successor inserted)--> Rotated
//!   |                  |
//!   +--> Expired       +--> Revoked (cascade)
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::auth::{
    generate_refresh_token, hash_token, is_well_formed_refresh_token, AccessTokenMinter,
    RefreshSecret,
};
use crate::clock::Clock;
use crate::configuration::JwtSettings;
use crate::error::{AccessTokenError, SessionError};
use crate::session::models::{Delegation, IssuedTokens, NewRefreshToken, RefreshTokenRecord};
use crate::session::revocation::{RevocationCascade, RevocationReason};
use crate::session::store::SessionStore;

const TOKEN_TYPE: &str = "Bearer";

#[derive(Clone)]
pub struct SessionEngine {
    store: Arc<dyn SessionStore>,
    minter: AccessTokenMinter,
    revocation: RevocationCascade,
    clock: Arc<dyn Clock>,
    refresh_ttl: Duration,
    session_ttl: Duration,
}

impl SessionEngine {
    pub fn new(store: Arc<dyn SessionStore>, config: JwtSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            revocation: RevocationCascade::new(store.clone(), clock.clone()),
            refresh_ttl: Duration::seconds(config.refresh_token_expiry),
            session_ttl: Duration::seconds(config.session_expiry),
            minter: AccessTokenMinter::new(config, clock.clone()),
            store,
            clock,
        }
    }

    pub fn minter(&self) -> &AccessTokenMinter {
        &self.minter
    }

    /// Validate a bearer access token and return its user id.
    pub fn authenticate(&self, access_token: &str) -> Result<Uuid, AccessTokenError> {
        self.minter.validate(access_token)
    }

    /// Start a new session for an already-authenticated user.
    pub async fn login(&self, user_id: Uuid) -> Result<IssuedTokens, SessionError> {
        let now = self.clock.now();
        let access_token = self.minter.mint(user_id)?;

        let delegation = self
            .store
            .create_delegation(user_id, now, now + self.session_ttl)
            .await?;
        let refresh_token = self.issue_refresh_token(&delegation, now).await?;

        tracing::info!(
            user_id = %user_id,
            session_id = %delegation.id,
            "Session created"
        );

        Ok(self.issued(access_token, refresh_token, &delegation))
    }

    /// Exchange a refresh token for a new access token and a successor
    /// refresh token in the same session.
    pub async fn rotate(&self, presented: &str) -> Result<IssuedTokens, SessionError> {
        let record = self.lookup(presented).await?;

        // A rotated-away token always reports reuse, whatever else has
        // happened to the session since.
        if record.is_used {
            return Err(self.reuse_detected(&record).await);
        }

        let delegation = self.load_delegation(&record).await?;

        // Expiry outranks revocation: an expired secret reports TokenExpired on
        // every presentation, not only the first one.
        let now = self.clock.now();
        if record.is_expired(now) || delegation.is_expired(now) {
            tracing::info!(
                user_id = %record.user_id,
                session_id = %delegation.id,
                "Refresh token expired"
            );
            self.revocation
                .revoke_delegation_only(delegation.id, RevocationReason::Expired)
                .await?;
            return Err(SessionError::TokenExpired);
        }

        if delegation.is_revoked() {
            tracing::warn!(
                user_id = %record.user_id,
                session_id = %delegation.id,
                "Refresh attempted on revoked session"
            );
            return Err(SessionError::SessionRevoked);
        }

        if !self
            .store
            .claim_refresh_token(&record.token_hash, now)
            .await?
        {
            // Lost the race to another rotation of the same token
            return Err(self.reuse_detected(&record).await);
        }

        let issued = match self.issue_successor(&record, &delegation, now).await {
            Ok(issued) => issued,
            Err(e) => {
                tracing::error!(
                    user_id = %record.user_id,
                    session_id = %delegation.id,
                    error = %e,
                    "Refresh token claimed without successor"
                );
                if let Err(revoke_err) = self
                    .revocation
                    .revoke(delegation.id, RevocationReason::Orphaned)
                    .await
                {
                    tracing::error!(
                        session_id = %delegation.id,
                        error = %revoke_err,
                        "Failed to revoke orphaned session"
                    );
                }
                return Err(e);
            }
        };

        if let Err(e) = self.store.touch_delegation(delegation.id, now).await {
            tracing::warn!(
                session_id = %delegation.id,
                error = %e,
                "Failed to update session last-used time"
            );
        }

        tracing::info!(
            user_id = %record.user_id,
            session_id = %delegation.id,
            "Refresh token rotated"
        );
        Ok(issued)
    }

    /// End the session the presented refresh token belongs to.
    ///
    /// Any unexpired token of an active session, current or rotated away, ends
    /// it. An expired token or an inactive session is `InvalidToken` and
    /// changes nothing, so a repeated logout fails cleanly.
    pub async fn logout(&self, presented: &str) -> Result<(), SessionError> {
        let record = self.lookup(presented).await?;
        let now = self.clock.now();

        if record.is_expired(now) {
            tracing::debug!(session_id = %record.delegation_id, "Logout with expired token");
            return Err(SessionError::InvalidToken);
        }

        let delegation = self.load_delegation(&record).await?;
        if !delegation.is_active(now) {
            tracing::debug!(session_id = %delegation.id, "Logout on inactive session");
            return Err(SessionError::InvalidToken);
        }

        self.revocation
            .revoke(delegation.id, RevocationReason::Logout)
            .await?;

        tracing::info!(
            user_id = %record.user_id,
            session_id = %delegation.id,
            "User logged out"
        );
        Ok(())
    }

    async fn lookup(&self, presented: &str) -> Result<RefreshTokenRecord, SessionError> {
        if !is_well_formed_refresh_token(presented) {
            return Err(SessionError::InvalidToken);
        }

        self.store
            .find_refresh_token_by_hash(&hash_token(presented))
            .await?
            .ok_or_else(|| {
                tracing::warn!("Refresh token not found");
                SessionError::InvalidToken
            })
    }

    async fn load_delegation(&self, record: &RefreshTokenRecord) -> Result<Delegation, SessionError> {
        match self.store.get_delegation(record.delegation_id).await? {
            Some(delegation) if delegation.user_id == record.user_id => Ok(delegation),
            Some(_) => {
                tracing::error!(
                    session_id = %record.delegation_id,
                    "Refresh token owner does not match session owner"
                );
                Err(SessionError::InvalidToken)
            }
            None => {
                tracing::error!(
                    session_id = %record.delegation_id,
                    "Refresh token references missing session"
                );
                Err(SessionError::InvalidToken)
            }
        }
    }

    /// Revoke the whole family. Returns the error the caller should see.
    async fn reuse_detected(&self, record: &RefreshTokenRecord) -> SessionError {
        tracing::warn!(
            user_id = %record.user_id,
            session_id = %record.delegation_id,
            used_at = ?record.used_at,
            "Refresh token reuse detected"
        );

        match self
            .revocation
            .revoke(record.delegation_id, RevocationReason::ReuseDetected)
            .await
        {
            Ok(()) => SessionError::TokenReuseDetected,
            Err(e) => e,
        }
    }

    async fn issue_successor(
        &self,
        record: &RefreshTokenRecord,
        delegation: &Delegation,
        now: DateTime<Utc>,
    ) -> Result<IssuedTokens, SessionError> {
        let access_token = self.minter.mint(record.user_id)?;
        let refresh_token = self.issue_refresh_token(delegation, now).await?;
        Ok(self.issued(access_token, refresh_token, delegation))
    }

    /// Insert a fresh token under `delegation`, never outliving it.
    async fn issue_refresh_token(
        &self,
        delegation: &Delegation,
        now: DateTime<Utc>,
    ) -> Result<RefreshSecret, SessionError> {
        let generated = generate_refresh_token();
        let expires_at = std::cmp::min(now + self.refresh_ttl, delegation.expires_at);

        self.store
            .insert_refresh_token(NewRefreshToken {
                token_hash: generated.hash,
                user_id: delegation.user_id,
                delegation_id: delegation.id,
                created_at: now,
                expires_at,
            })
            .await?;

        Ok(generated.secret)
    }

    fn issued(
        &self,
        access_token: String,
        refresh_token: RefreshSecret,
        delegation: &Delegation,
    ) -> IssuedTokens {
        IssuedTokens {
            access_token,
            refresh_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.minter.ttl(),
            session_id: delegation.id,
            session_expires_at: delegation.expires_at,
        }
    }
}
