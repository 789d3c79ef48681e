//! Token issuance, verification, and single-use refresh rotation.

use crate::models::{AuditEventType, Session};
use crate::services::{
    AuditChain, JwtService, ServiceError, SessionService, TokenBlacklist, TokenClaims, TokenKind,
};
use crate::store::AuthzStore;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// The pair handed to a client at login or refresh.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub session_id: Uuid,
}

pub struct TokenService {
    jwt: Arc<JwtService>,
    store: Arc<dyn AuthzStore>,
    blacklist: Arc<dyn TokenBlacklist>,
    sessions: Arc<SessionService>,
    audit: Arc<AuditChain>,
    store_timeout: Duration,
}

impl TokenService {
    pub fn new(
        jwt: Arc<JwtService>,
        store: Arc<dyn AuthzStore>,
        blacklist: Arc<dyn TokenBlacklist>,
        sessions: Arc<SessionService>,
        audit: Arc<AuditChain>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            jwt,
            store,
            blacklist,
            sessions,
            audit,
            store_timeout,
        }
    }

    /// Issue a fresh token pair for an authenticated user, starting a new
    /// session and refresh-token family.
    pub async fn issue_token_pair(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<TokenPair, ServiceError> {
        let family_id = Uuid::new_v4();
        let access = self.jwt.sign_access_token(user_id, tenant_id)?;
        let refresh = self.jwt.sign_refresh_token(user_id, tenant_id, family_id)?;

        let session = Session::new(
            user_id,
            tenant_id,
            access.jti.clone(),
            refresh.jti.clone(),
            family_id,
            refresh.expires_at,
        );
        tokio::time::timeout(self.store_timeout, self.store.insert_session(&session))
            .await
            .map_err(|_| ServiceError::Timeout)??;

        self.audit
            .append(
                Some(tenant_id),
                Some(user_id),
                AuditEventType::UserLogin,
                json!({
                    "session_id": session.id,
                    "family_id": family_id,
                }),
                ip_address,
                user_agent,
            )
            .await?;

        tracing::info!(user_id = %user_id, session_id = %session.id, "Token pair issued");
        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
            session_id: session.id,
        })
    }

    /// Verify a token of the expected kind. Returns `None` for anything
    /// short of a fully valid token: bad signature, expired, wrong kind,
    /// blacklisted, or a blacklist check that failed or timed out. Fails
    /// closed.
    pub async fn verify_token(&self, token: &str, expected: TokenKind) -> Option<TokenClaims> {
        let claims = match self.jwt.decode_token(token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(error = %e, "Token rejected at decode");
                return None;
            }
        };

        if claims.kind != expected {
            tracing::debug!(
                expected = expected.as_str(),
                got = claims.kind.as_str(),
                "Token kind mismatch"
            );
            return None;
        }

        match tokio::time::timeout(self.store_timeout, self.blacklist.is_blacklisted(&claims.jti))
            .await
        {
            Ok(Ok(false)) => Some(claims),
            Ok(Ok(true)) => None,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Blacklist check failed; rejecting token");
                None
            }
            Err(_) => {
                tracing::error!("Blacklist check timed out; rejecting token");
                None
            }
        }
    }

    /// Rotate a refresh token: the presented token is consumed and a new
    /// pair is issued for the same session and family.
    ///
    /// A structurally valid refresh token that no active session carries is
    /// treated as a replay of an already-consumed token, and the whole
    /// family is revoked.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<TokenPair, ServiceError> {
        let claims = self
            .verify_token(refresh_token, TokenKind::Refresh)
            .await
            .ok_or(ServiceError::InvalidToken)?;
        let user_id = claims.user_id().ok_or(ServiceError::InvalidToken)?;
        let tenant_id = claims.tenant_id().ok_or(ServiceError::InvalidToken)?;
        let family_id = claims.family_id().ok_or(ServiceError::InvalidToken)?;

        let session = tokio::time::timeout(
            self.store_timeout,
            self.store.find_session_by_refresh_jti(&claims.jti),
        )
        .await
        .map_err(|_| ServiceError::Timeout)??;

        let Some(session) = session else {
            return self
                .handle_replay(user_id, tenant_id, family_id, ip_address, user_agent)
                .await;
        };

        if !session.is_valid() {
            return Err(ServiceError::SessionNotFound);
        }

        let membership = tokio::time::timeout(
            self.store_timeout,
            self.store.find_membership(user_id, tenant_id),
        )
        .await
        .map_err(|_| ServiceError::Timeout)??;
        if !membership.map_or(false, |m| m.is_active()) {
            return Err(ServiceError::MembershipInactive);
        }

        let access = self.jwt.sign_access_token(user_id, tenant_id)?;
        let refresh = self.jwt.sign_refresh_token(user_id, tenant_id, family_id)?;

        let rotated = tokio::time::timeout(
            self.store_timeout,
            self.store.rotate_session(
                session.id,
                &claims.jti,
                &access.jti,
                &refresh.jti,
                Utc::now(),
            ),
        )
        .await
        .map_err(|_| ServiceError::Timeout)??;

        if !rotated {
            // Lost a race with a concurrent rotation of the same jti; the
            // presented token has already been consumed.
            return self
                .handle_replay(user_id, tenant_id, family_id, ip_address, user_agent)
                .await;
        }

        self.audit
            .append(
                Some(tenant_id),
                Some(user_id),
                AuditEventType::TokenRefreshed,
                json!({
                    "session_id": session.id,
                    "family_id": family_id,
                }),
                ip_address,
                user_agent,
            )
            .await?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
            session_id: session.id,
        })
    }

    async fn handle_replay(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        family_id: Uuid,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<TokenPair, ServiceError> {
        tracing::warn!(
            user_id = %user_id,
            family_id = %family_id,
            "Refresh token replay detected"
        );

        self.audit
            .append(
                Some(tenant_id),
                Some(user_id),
                AuditEventType::TokenReplayDetected,
                json!({ "family_id": family_id }),
                ip_address,
                user_agent,
            )
            .await?;
        self.sessions.revoke_family(family_id).await?;

        Err(ServiceError::TokenReplay)
    }
}
