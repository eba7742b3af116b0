//! Process-local session store.
//!
//! Every operation runs under a single mutex acquisition, which makes the
//! claim and the revocation cascade atomic. Nothing is awaited while the lock
//! is held.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::session::models::{Delegation, NewRefreshToken, RefreshTokenRecord};
use crate::session::store::{SessionStore, UserStore};
use crate::users::{normalize_email, User};

#[derive(Default)]
struct State {
    delegations: HashMap<Uuid, Delegation>,
    /// Keyed by token hash
    tokens: HashMap<String, RefreshTokenRecord>,
    users: HashMap<Uuid, User>,
}

#[derive(Default)]
pub struct InMemorySessionStore {
    state: Mutex<State>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("session store lock poisoned".to_string()))
    }

    /// Register a user account. Emails are stored normalized.
    pub fn insert_user(&self, mut user: User) -> Result<(), StoreError> {
        user.email = normalize_email(&user.email);
        self.lock()?.users.insert(user.id, user);
        Ok(())
    }

    /// Every record ever issued under a delegation, oldest first.
    pub fn tokens_in_delegation(
        &self,
        delegation_id: Uuid,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        let state = self.lock()?;
        let mut records: Vec<RefreshTokenRecord> = state
            .tokens
            .values()
            .filter(|r| r.delegation_id == delegation_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    pub fn delegations_for_user(&self, user_id: Uuid) -> Result<Vec<Delegation>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .delegations
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect())
    }
}

fn revoke(state: &mut State, id: Uuid, at: DateTime<Utc>) {
    if let Some(delegation) = state.delegations.get_mut(&id) {
        if delegation.revoked_at.is_none() {
            delegation.revoked_at = Some(at);
        }
    }
}

fn expire_tokens(state: &mut State, delegation_id: Uuid, at: DateTime<Utc>) {
    state
        .tokens
        .values_mut()
        .filter(|r| r.delegation_id == delegation_id && r.expires_at > at)
        .for_each(|r| r.expires_at = at);
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_delegation(
        &self,
        user_id: Uuid,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Delegation, StoreError> {
        let delegation = Delegation {
            id: Uuid::new_v4(),
            user_id,
            created_at,
            expires_at,
            revoked_at: None,
            last_used_at: created_at,
        };
        self.lock()?
            .delegations
            .insert(delegation.id, delegation.clone());
        Ok(delegation)
    }

    async fn get_delegation(&self, id: Uuid) -> Result<Option<Delegation>, StoreError> {
        Ok(self.lock()?.delegations.get(&id).cloned())
    }

    async fn revoke_delegation(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        revoke(&mut state, id, at);
        Ok(())
    }

    async fn touch_delegation(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(delegation) = self.lock()?.delegations.get_mut(&id) {
            delegation.last_used_at = at;
        }
        Ok(())
    }

    async fn insert_refresh_token(
        &self,
        token: NewRefreshToken,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let mut state = self.lock()?;
        if state.tokens.contains_key(&token.token_hash) {
            return Err(StoreError::DuplicateHash);
        }
        let has_current = state
            .tokens
            .values()
            .any(|r| r.delegation_id == token.delegation_id && !r.is_used);
        if has_current {
            return Err(StoreError::CurrentTokenExists);
        }

        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            token_hash: token.token_hash,
            user_id: token.user_id,
            delegation_id: token.delegation_id,
            created_at: token.created_at,
            expires_at: token.expires_at,
            is_used: false,
            used_at: None,
        };
        state
            .tokens
            .insert(record.token_hash.clone(), record.clone());
        Ok(record)
    }

    async fn find_refresh_token_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self.lock()?.tokens.get(hash).cloned())
    }

    async fn claim_refresh_token(
        &self,
        hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.tokens.get_mut(hash) {
            Some(record) if !record.is_used => {
                record.is_used = true;
                record.used_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_all_tokens_in_delegation(
        &self,
        delegation_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        expire_tokens(&mut state, delegation_id, at);
        Ok(())
    }

    async fn revoke_delegation_cascade(
        &self,
        delegation_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        revoke(&mut state, delegation_id, at);
        expire_tokens(&mut state, delegation_id, at);
        Ok(())
    }
}

#[async_trait]
impl UserStore for InMemorySessionStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = normalize_email(email);
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.lock()?.users.get(&id).cloned())
    }
}
