//! Persistence seam for the authorization core.
//!
//! What must be durably held is defined by the models; the engine is
//! storage-agnostic behind [`AuthzStore`]. `PgStore` is the production
//! implementation, `MemoryStore` backs the test suite.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::models::{AuditEntry, Membership, Policy, Role, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Durable state behind the authorization core: roles, memberships, policies,
/// sessions, and the audit chain.
///
/// Lookups return `Ok(None)` for missing rows; only infrastructure failures
/// surface as errors.
#[async_trait]
pub trait AuthzStore: Send + Sync {
    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, StoreError>;

    /// Insert or replace a role. Hierarchy validation happens above the store.
    async fn save_role(&self, role: &Role) -> Result<(), StoreError>;

    async fn find_membership(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<Membership>, StoreError>;

    async fn save_membership(&self, membership: &Membership) -> Result<(), StoreError>;

    /// All policies of a tenant, applicable or not; filtering is the
    /// evaluator's concern.
    async fn policies_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<Policy>, StoreError>;

    async fn save_policy(&self, policy: &Policy) -> Result<(), StoreError>;

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError>;

    /// Sessions are looked up by the refresh jti they currently carry. A
    /// structurally valid refresh token with no matching session is the
    /// replay signal.
    async fn find_session_by_refresh_jti(
        &self,
        refresh_token_jti: &str,
    ) -> Result<Option<Session>, StoreError>;

    /// Conditionally rotate a session's jti pair: succeeds only while the
    /// session is active and still carries `expected_refresh_jti`. Returns
    /// whether the swap happened; the loser of a concurrent rotation
    /// observes `false`.
    async fn rotate_session(
        &self,
        session_id: Uuid,
        expected_refresh_jti: &str,
        new_access_jti: &str,
        new_refresh_jti: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Mark a session inactive with a revocation reason. Returns whether the
    /// session existed and was active.
    async fn deactivate_session(
        &self,
        session_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn sessions_in_family(&self, family_id: Uuid) -> Result<Vec<Session>, StoreError>;

    async fn active_sessions_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, StoreError>;

    /// Append-only; the audit chain serializes calls per scope above the
    /// store.
    async fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    async fn latest_audit_entry(
        &self,
        tenant_id: Option<Uuid>,
    ) -> Result<Option<AuditEntry>, StoreError>;

    /// Most recent entries of a chain scope in append order (oldest first).
    async fn recent_audit_entries(
        &self,
        tenant_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, StoreError>;
}
