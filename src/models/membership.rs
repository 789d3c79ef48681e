//! Membership model - a user's assignment within an organization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Membership status. Only active memberships may be authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "membership_status", rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Suspended,
    Revoked,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "active",
            MembershipStatus::Suspended => "suspended",
            MembershipStatus::Revoked => "revoked",
        }
    }
}

/// Membership entity linking a user to an organization through a role.
///
/// The effective permission set of a principal is the role's resolved
/// (inherited) permissions unioned with `custom_permissions`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role_id: Uuid,
    pub custom_permissions: Vec<String>,
    pub status: MembershipStatus,
    pub created_at: DateTime<Utc>,
}

impl Membership {
    /// Create an active membership.
    pub fn new(user_id: Uuid, organization_id: Uuid, role_id: Uuid) -> Self {
        Self {
            user_id,
            organization_id,
            role_id,
            custom_permissions: Vec::new(),
            status: MembershipStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MembershipStatus::Active
    }
}
