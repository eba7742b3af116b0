//! Revocation cascade: terminate a delegation and every token issued under it.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::error::SessionError;
use crate::session::store::SessionStore;

/// Why a delegation is being revoked; logged with the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Logout,
    ReuseDetected,
    Expired,
    /// A token was claimed but its successor never reached the client.
    Orphaned,
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RevocationReason::Logout => "logout",
            RevocationReason::ReuseDetected => "reuse_detected",
            RevocationReason::Expired => "expired",
            RevocationReason::Orphaned => "orphaned",
        };
        f.write_str(reason)
    }
}

#[derive(Clone)]
pub struct RevocationCascade {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

impl RevocationCascade {
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Revoke the delegation and expire all of its tokens in one unit.
    ///
    /// # Errors
    /// `SessionError::RevocationIncomplete` if the store could not commit.
    /// The revocation must then be retried; nothing about it is safe to assume.
    pub async fn revoke(
        &self,
        delegation_id: Uuid,
        reason: RevocationReason,
    ) -> Result<(), SessionError> {
        let at = self.clock.now();

        match self.store.revoke_delegation_cascade(delegation_id, at).await {
            Ok(()) => {
                tracing::warn!(
                    session_id = %delegation_id,
                    reason = %reason,
                    "Session revoked"
                );
                Ok(())
            }
            Err(source) => {
                tracing::error!(
                    session_id = %delegation_id,
                    reason = %reason,
                    error = %source,
                    "Session revocation incomplete"
                );
                Err(SessionError::RevocationIncomplete {
                    delegation_id,
                    source,
                })
            }
        }
    }

    /// Mark only the delegation revoked, leaving token expiries alone.
    /// Used when a session simply ran out of time.
    pub async fn revoke_delegation_only(
        &self,
        delegation_id: Uuid,
        reason: RevocationReason,
    ) -> Result<(), SessionError> {
        self.store
            .revoke_delegation(delegation_id, self.clock.now())
            .await
            .map_err(|source| {
                tracing::error!(
                    session_id = %delegation_id,
                    reason = %reason,
                    error = %source,
                    "Session revocation incomplete"
                );
                SessionError::RevocationIncomplete {
                    delegation_id,
                    source,
                }
            })?;
        tracing::info!(session_id = %delegation_id, reason = %reason, "Session revoked");
        Ok(())
    }
}
