//! Session lifecycle: logout, family revocation, and listings.

use crate::models::{AuditEventType, SessionInfo};
use crate::services::{AuditChain, ServiceError, TokenBlacklist};
use crate::store::AuthzStore;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const LOGOUT_REASON: &str = "user_logout";
const FAMILY_REVOKED_REASON: &str = "family_revoked_security";

pub struct SessionService {
    store: Arc<dyn AuthzStore>,
    blacklist: Arc<dyn TokenBlacklist>,
    audit: Arc<AuditChain>,
    store_timeout: Duration,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn AuthzStore>,
        blacklist: Arc<dyn TokenBlacklist>,
        audit: Arc<AuditChain>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            blacklist,
            audit,
            store_timeout,
        }
    }

    /// End a session on behalf of its owner. Both outstanding jtis are
    /// blacklisted for the remainder of the session's lifetime so verification
    /// rejects them everywhere before the blacklist entries expire.
    pub async fn logout(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<(), ServiceError> {
        let session = tokio::time::timeout(self.store_timeout, self.store.find_session(session_id))
            .await
            .map_err(|_| ServiceError::Timeout)??
            .ok_or(ServiceError::SessionNotFound)?;

        if session.user_id != user_id {
            return Err(ServiceError::NotSessionOwner);
        }

        let deactivated = tokio::time::timeout(
            self.store_timeout,
            self.store.deactivate_session(session_id, LOGOUT_REASON, Utc::now()),
        )
        .await
        .map_err(|_| ServiceError::Timeout)??;
        if !deactivated {
            // Already inactive; nothing left to revoke.
            return Ok(());
        }

        let ttl = (session.expires_at - Utc::now()).num_seconds().max(1);
        self.blacklist
            .blacklist_token(&session.access_token_jti, ttl)
            .await
            .map_err(ServiceError::Kv)?;
        self.blacklist
            .blacklist_token(&session.refresh_token_jti, ttl)
            .await
            .map_err(ServiceError::Kv)?;

        self.audit
            .append(
                Some(session.tenant_id),
                Some(user_id),
                AuditEventType::UserLogout,
                json!({ "session_id": session_id }),
                ip_address,
                user_agent,
            )
            .await?;

        tracing::info!(session_id = %session_id, user_id = %user_id, "Session ended");
        Ok(())
    }

    /// Revoke every session in a refresh-token family. Used when a refresh
    /// token is replayed: all credentials descended from the compromised
    /// family are cut off at once.
    pub async fn revoke_family(&self, family_id: Uuid) -> Result<usize, ServiceError> {
        let sessions =
            tokio::time::timeout(self.store_timeout, self.store.sessions_in_family(family_id))
                .await
                .map_err(|_| ServiceError::Timeout)??;

        let mut revoked = 0;
        for session in &sessions {
            let deactivated = tokio::time::timeout(
                self.store_timeout,
                self.store
                    .deactivate_session(session.id, FAMILY_REVOKED_REASON, Utc::now()),
            )
            .await
            .map_err(|_| ServiceError::Timeout)??;

            let ttl = (session.expires_at - Utc::now()).num_seconds().max(1);
            self.blacklist
                .blacklist_token(&session.access_token_jti, ttl)
                .await
                .map_err(ServiceError::Kv)?;
            self.blacklist
                .blacklist_token(&session.refresh_token_jti, ttl)
                .await
                .map_err(ServiceError::Kv)?;

            if deactivated {
                revoked += 1;
                self.audit
                    .append(
                        Some(session.tenant_id),
                        Some(session.user_id),
                        AuditEventType::FamilyRevoked,
                        json!({
                            "session_id": session.id,
                            "family_id": family_id,
                        }),
                        None,
                        None,
                    )
                    .await?;
            }
        }

        tracing::warn!(family_id = %family_id, revoked, "Refresh token family revoked");
        Ok(revoked)
    }

    /// Administrative listing of a user's active sessions.
    pub async fn active_sessions(&self, user_id: Uuid) -> Result<Vec<SessionInfo>, ServiceError> {
        let sessions = tokio::time::timeout(
            self.store_timeout,
            self.store.active_sessions_for_user(user_id),
        )
        .await
        .map_err(|_| ServiceError::Timeout)??;
        Ok(sessions.iter().map(SessionInfo::from).collect())
    }
}
