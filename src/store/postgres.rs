//! PostgreSQL implementation of the store.

use super::{AuthzStore, StoreError};
use crate::models::{AuditEntry, Membership, Policy, Role, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn policy_from_row(row: &PgRow) -> Result<Policy, StoreError> {
    let effect: String = row.try_get("effect")?;
    let target_type: String = row.try_get("target_type")?;
    let conditions: serde_json::Value = row.try_get("conditions")?;
    let rules: serde_json::Value = row.try_get("rules")?;

    Ok(Policy {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        effect: effect.parse().map_err(StoreError::InvalidValue)?,
        priority: row.try_get("priority")?,
        enabled: row.try_get("enabled")?,
        target_type: target_type.parse().map_err(StoreError::InvalidValue)?,
        target_id: row.try_get("target_id")?,
        resource_type: row.try_get("resource_type")?,
        resource_pattern: row.try_get("resource_pattern")?,
        actions: row.try_get("actions")?,
        conditions: serde_json::from_value(conditions)?,
        rules: serde_json::from_value(rules)?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl AuthzStore for PgStore {
    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, StoreError> {
        let role = sqlx::query_as::<_, Role>(
            "SELECT id, organization_id, name, permission_strings, parent_role_id, is_system, created_at
             FROM roles WHERE id = $1",
        )
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(role)
    }

    async fn save_role(&self, role: &Role) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO roles (id, organization_id, name, permission_strings, parent_role_id, is_system, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE SET
                 name = EXCLUDED.name,
                 permission_strings = EXCLUDED.permission_strings,
                 parent_role_id = EXCLUDED.parent_role_id",
        )
        .bind(role.id)
        .bind(role.organization_id)
        .bind(&role.name)
        .bind(&role.permission_strings)
        .bind(role.parent_role_id)
        .bind(role.is_system)
        .bind(role.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_membership(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<Membership>, StoreError> {
        let membership = sqlx::query_as::<_, Membership>(
            "SELECT user_id, organization_id, role_id, custom_permissions, status, created_at
             FROM memberships WHERE user_id = $1 AND organization_id = $2",
        )
        .bind(user_id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(membership)
    }

    async fn save_membership(&self, membership: &Membership) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO memberships (user_id, organization_id, role_id, custom_permissions, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (user_id, organization_id) DO UPDATE SET
                 role_id = EXCLUDED.role_id,
                 custom_permissions = EXCLUDED.custom_permissions,
                 status = EXCLUDED.status",
        )
        .bind(membership.user_id)
        .bind(membership.organization_id)
        .bind(membership.role_id)
        .bind(&membership.custom_permissions)
        .bind(membership.status)
        .bind(membership.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn policies_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<Policy>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, effect, priority, enabled, target_type, target_id,
                    resource_type, resource_pattern, actions, conditions, rules, expires_at, created_at
             FROM policies WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(policy_from_row).collect()
    }

    async fn save_policy(&self, policy: &Policy) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO policies (id, tenant_id, name, effect, priority, enabled, target_type, target_id,
                                   resource_type, resource_pattern, actions, conditions, rules, expires_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             ON CONFLICT (id) DO UPDATE SET
                 name = EXCLUDED.name,
                 effect = EXCLUDED.effect,
                 priority = EXCLUDED.priority,
                 enabled = EXCLUDED.enabled,
                 target_type = EXCLUDED.target_type,
                 target_id = EXCLUDED.target_id,
                 resource_type = EXCLUDED.resource_type,
                 resource_pattern = EXCLUDED.resource_pattern,
                 actions = EXCLUDED.actions,
                 conditions = EXCLUDED.conditions,
                 rules = EXCLUDED.rules,
                 expires_at = EXCLUDED.expires_at",
        )
        .bind(policy.id)
        .bind(policy.tenant_id)
        .bind(&policy.name)
        .bind(policy.effect.as_str())
        .bind(policy.priority)
        .bind(policy.enabled)
        .bind(policy.target_type.as_str())
        .bind(policy.target_id)
        .bind(&policy.resource_type)
        .bind(&policy.resource_pattern)
        .bind(&policy.actions)
        .bind(serde_json::to_value(&policy.conditions)?)
        .bind(serde_json::to_value(&policy.rules)?)
        .bind(policy.expires_at)
        .bind(policy.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, tenant_id, access_token_jti, refresh_token_jti,
                                   refresh_token_family, is_active, expires_at, revoked_at,
                                   revoked_reason, last_activity_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.tenant_id)
        .bind(&session.access_token_jti)
        .bind(&session.refresh_token_jti)
        .bind(session.refresh_token_family)
        .bind(session.is_active)
        .bind(session.expires_at)
        .bind(session.revoked_at)
        .bind(&session.revoked_reason)
        .bind(session.last_activity_at)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn find_session_by_refresh_jti(
        &self,
        refresh_token_jti: &str,
    ) -> Result<Option<Session>, StoreError> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE refresh_token_jti = $1 AND is_active",
        )
        .bind(refresh_token_jti)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn rotate_session(
        &self,
        session_id: Uuid,
        expected_refresh_jti: &str,
        new_access_jti: &str,
        new_refresh_jti: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // Conditional update: the WHERE clause is the critical section. Two
        // concurrent rotations of the same token cannot both match.
        let result = sqlx::query(
            "UPDATE sessions
             SET access_token_jti = $3, refresh_token_jti = $4, last_activity_at = $5
             WHERE id = $1 AND refresh_token_jti = $2 AND is_active",
        )
        .bind(session_id)
        .bind(expected_refresh_jti)
        .bind(new_access_jti)
        .bind(new_refresh_jti)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn deactivate_session(
        &self,
        session_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions
             SET is_active = FALSE, revoked_at = $3, revoked_reason = $2
             WHERE id = $1 AND is_active",
        )
        .bind(session_id)
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn sessions_in_family(&self, family_id: Uuid) -> Result<Vec<Session>, StoreError> {
        let sessions = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE refresh_token_family = $1",
        )
        .bind(family_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn active_sessions_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, StoreError> {
        let sessions = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE user_id = $1 AND is_active ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO audit_entries (id, tenant_id, user_id, event_type, event_data,
                                        ip_address, user_agent, timestamp, previous_hash, current_hash)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(entry.id)
        .bind(entry.tenant_id)
        .bind(entry.user_id)
        .bind(&entry.event_type)
        .bind(&entry.event_data)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.timestamp)
        .bind(&entry.previous_hash)
        .bind(&entry.current_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_audit_entry(
        &self,
        tenant_id: Option<Uuid>,
    ) -> Result<Option<AuditEntry>, StoreError> {
        let entry = sqlx::query_as::<_, AuditEntry>(
            "SELECT id, tenant_id, user_id, event_type, event_data, ip_address, user_agent,
                    timestamp, previous_hash, current_hash
             FROM audit_entries
             WHERE tenant_id IS NOT DISTINCT FROM $1
             ORDER BY seq DESC LIMIT 1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn recent_audit_entries(
        &self,
        tenant_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            "SELECT id, tenant_id, user_id, event_type, event_data, ip_address, user_agent,
                    timestamp, previous_hash, current_hash
             FROM (SELECT * FROM audit_entries
                   WHERE tenant_id IS NOT DISTINCT FROM $1
                   ORDER BY seq DESC LIMIT $2) latest
             ORDER BY seq ASC",
        )
        .bind(tenant_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}
