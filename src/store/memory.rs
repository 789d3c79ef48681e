//! In-memory store used by the test suite and local development.

use super::{AuthzStore, StoreError};
use crate::models::{AuditEntry, Membership, Policy, Role, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    roles: HashMap<Uuid, Role>,
    memberships: HashMap<(Uuid, Uuid), Membership>,
    policies: HashMap<Uuid, Policy>,
    sessions: HashMap<Uuid, Session>,
    /// Per-scope audit chains in append order; key is the tenant scope.
    audit: HashMap<Option<Uuid>, Vec<AuditEntry>>,
}

/// Mutex-backed implementation of [`AuthzStore`]. The session table's
/// conditional rotation runs under the table lock, which is what gives
/// refresh rotation its at-most-once guarantee here.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        // Poisoning only happens if a holder panicked; the data is still
        // consistent for read-mostly test usage.
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AuthzStore for MemoryStore {
    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, StoreError> {
        Ok(self.lock().roles.get(&role_id).cloned())
    }

    async fn save_role(&self, role: &Role) -> Result<(), StoreError> {
        self.lock().roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn find_membership(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<Membership>, StoreError> {
        Ok(self
            .lock()
            .memberships
            .get(&(user_id, organization_id))
            .cloned())
    }

    async fn save_membership(&self, membership: &Membership) -> Result<(), StoreError> {
        self.lock().memberships.insert(
            (membership.user_id, membership.organization_id),
            membership.clone(),
        );
        Ok(())
    }

    async fn policies_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<Policy>, StoreError> {
        Ok(self
            .lock()
            .policies
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn save_policy(&self, policy: &Policy) -> Result<(), StoreError> {
        self.lock().policies.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        self.lock().sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.lock().sessions.get(&session_id).cloned())
    }

    async fn find_session_by_refresh_jti(
        &self,
        refresh_token_jti: &str,
    ) -> Result<Option<Session>, StoreError> {
        Ok(self
            .lock()
            .sessions
            .values()
            .find(|s| s.is_active && s.refresh_token_jti == refresh_token_jti)
            .cloned())
    }

    async fn rotate_session(
        &self,
        session_id: Uuid,
        expected_refresh_jti: &str,
        new_access_jti: &str,
        new_refresh_jti: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.lock();
        match tables.sessions.get_mut(&session_id) {
            Some(s) if s.is_active && s.refresh_token_jti == expected_refresh_jti => {
                s.access_token_jti = new_access_jti.to_string();
                s.refresh_token_jti = new_refresh_jti.to_string();
                s.last_activity_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate_session(
        &self,
        session_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.lock();
        match tables.sessions.get_mut(&session_id) {
            Some(s) if s.is_active => {
                s.is_active = false;
                s.revoked_at = Some(now);
                s.revoked_reason = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sessions_in_family(&self, family_id: Uuid) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .lock()
            .sessions
            .values()
            .filter(|s| s.refresh_token_family == family_id)
            .cloned()
            .collect())
    }

    async fn active_sessions_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .lock()
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active)
            .cloned()
            .collect())
    }

    async fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.lock()
            .audit
            .entry(entry.tenant_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn latest_audit_entry(
        &self,
        tenant_id: Option<Uuid>,
    ) -> Result<Option<AuditEntry>, StoreError> {
        Ok(self
            .lock()
            .audit
            .get(&tenant_id)
            .and_then(|chain| chain.last().cloned()))
    }

    async fn recent_audit_entries(
        &self,
        tenant_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self
            .lock()
            .audit
            .get(&tenant_id)
            .map(|chain| {
                let skip = chain.len().saturating_sub(limit);
                chain[skip..].to_vec()
            })
            .unwrap_or_default())
    }
}
