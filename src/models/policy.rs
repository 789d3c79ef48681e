//! Policy model - attribute/context-aware allow/deny rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Policy effect. Explicit deny always wins over allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEffect {
    Allow,
    Deny,
}

impl PolicyEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyEffect::Allow => "allow",
            PolicyEffect::Deny => "deny",
        }
    }
}

impl std::str::FromStr for PolicyEffect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(PolicyEffect::Allow),
            "deny" => Ok(PolicyEffect::Deny),
            other => Err(format!("invalid policy effect: {}", other)),
        }
    }
}

/// What a policy is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyTarget {
    User,
    Role,
    Organization,
}

impl PolicyTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyTarget::User => "user",
            PolicyTarget::Role => "role",
            PolicyTarget::Organization => "organization",
        }
    }
}

impl std::str::FromStr for PolicyTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(PolicyTarget::User),
            "role" => Ok(PolicyTarget::Role),
            "organization" => Ok(PolicyTarget::Organization),
            other => Err(format!("invalid policy target: {}", other)),
        }
    }
}

/// Inclusive hour-of-day window (UTC). Wraps midnight when `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl TimeWindow {
    pub fn contains_hour(&self, hour: u8) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour <= self.end_hour
        } else {
            hour >= self.start_hour || hour <= self.end_hour
        }
    }
}

/// Conditions a request context must satisfy for a policy to match.
///
/// Absent fields are unconstrained.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConditions {
    /// IPv4 range in CIDR notation (`10.0.0.0/8`) or an exact address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa_required: Option<bool>,
    /// Attribute equality checks against the request context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl PolicyConditions {
    pub fn is_empty(&self) -> bool {
        self.ip_range.is_none()
            && self.time_window.is_none()
            && self.mfa_required.is_none()
            && self.attributes.is_empty()
    }
}

/// An embedded sub-rule: pattern predicates over subject, action, and
/// resource, carrying its own effect. Interpreted explicitly, never by shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub effect: PolicyEffect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pattern: Option<String>,
}

/// Policy entity (tenant-scoped).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub effect: PolicyEffect,
    /// Higher priority is evaluated first.
    pub priority: i32,
    pub enabled: bool,
    pub target_type: PolicyTarget,
    pub target_id: Option<Uuid>,
    pub resource_type: Option<String>,
    /// Glob-style pattern (`*` any run, `?` single char) over the resource.
    pub resource_pattern: Option<String>,
    /// Actions this policy constrains; empty means any action.
    pub actions: Vec<String>,
    pub conditions: PolicyConditions,
    pub rules: Vec<PolicyRule>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Policy {
    /// Create an enabled tenant-wide policy with defaults.
    pub fn new(tenant_id: Uuid, name: impl Into<String>, effect: PolicyEffect) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            effect,
            priority: 0,
            enabled: true,
            target_type: PolicyTarget::Organization,
            target_id: None,
            resource_type: None,
            resource_pattern: None,
            actions: Vec::new(),
            conditions: PolicyConditions::default(),
            rules: Vec::new(),
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    /// Disabled or expired policies are never applied.
    pub fn is_applicable(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.expires_at.map_or(true, |exp| exp > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_disabled_policy_is_not_applicable() {
        let mut policy = Policy::new(Uuid::new_v4(), "blanket-deny", PolicyEffect::Deny);
        assert!(policy.is_applicable(Utc::now()));
        policy.enabled = false;
        assert!(!policy.is_applicable(Utc::now()));
    }

    #[test]
    fn test_expired_policy_is_not_applicable() {
        let mut policy = Policy::new(Uuid::new_v4(), "temporary-allow", PolicyEffect::Allow);
        policy.expires_at = Some(Utc::now() - Duration::minutes(1));
        assert!(!policy.is_applicable(Utc::now()));
    }

    #[test]
    fn test_time_window_wraps_midnight() {
        let window = TimeWindow {
            start_hour: 22,
            end_hour: 4,
        };
        assert!(window.contains_hour(23));
        assert!(window.contains_hour(2));
        assert!(!window.contains_hour(12));
    }
}
