//! Session model - the durable record behind an issued token pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Session entity. Exactly one row exists per refresh-token family at issue
/// time; rotation rewrites the jti pair in place, keeping the family id.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub access_token_jti: String,
    pub refresh_token_jti: String,
    pub refresh_token_family: Uuid,
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Create an active session for a freshly issued token pair.
    pub fn new(
        user_id: Uuid,
        tenant_id: Uuid,
        access_token_jti: String,
        refresh_token_jti: String,
        refresh_token_family: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            tenant_id,
            access_token_jti,
            refresh_token_jti,
            refresh_token_family,
            is_active: true,
            expires_at,
            revoked_at: None,
            revoked_reason: None,
            last_activity_at: now,
            created_at: now,
        }
    }

    /// Active, not revoked, not past its expiry.
    pub fn is_valid(&self) -> bool {
        self.is_active && self.revoked_at.is_none() && self.expires_at > Utc::now()
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Session projection for administrative listings.
#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub tenant_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl From<&Session> for SessionInfo {
    fn from(s: &Session) -> Self {
        Self {
            session_id: s.id,
            tenant_id: s.tenant_id,
            created_at: s.created_at,
            expires_at: s.expires_at,
            last_activity_at: s.last_activity_at,
        }
    }
}
