//! Role model - tenant-scoped roles carrying permission strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Role entity (tenant-scoped).
///
/// Permission strings follow `resource:action`, with `*` as the wildcard for
/// either segment, and the scoped variants `resource:own:action` and
/// `resource:resource_id:action`. A role may inherit from a parent role; the
/// parent chain must stay acyclic (enforced at mutation time).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub permission_strings: Vec<String>,
    pub parent_role_id: Option<Uuid>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

impl Role {
    /// Create a new role with no parent.
    pub fn new(organization_id: Uuid, name: impl Into<String>, permissions: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name: name.into(),
            permission_strings: permissions,
            parent_role_id: None,
            is_system: false,
            created_at: Utc::now(),
        }
    }

    /// Create a role inheriting from `parent`.
    pub fn with_parent(
        organization_id: Uuid,
        name: impl Into<String>,
        permissions: Vec<String>,
        parent: Uuid,
    ) -> Self {
        Self {
            parent_role_id: Some(parent),
            ..Self::new(organization_id, name, permissions)
        }
    }
}
