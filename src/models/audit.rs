//! Audit log entry model - hash-linked, append-only.
//!
//! Each entry embeds the hash of its predecessor:
//! `current_hash = sha256(previous_hash || canonical(event_data) || event_type || timestamp)`.
//! The first entry of a chain uses the literal sentinel `"genesis"` as its
//! previous hash. Entries are never mutated or deleted; any retroactive edit
//! breaks recomputation and is detectable offline.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Sentinel previous-hash of the first entry in a chain.
pub const GENESIS_HASH: &str = "genesis";

/// Audit event types written by the token service and authorization engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    UserLogin,
    UserLogout,
    TokenRefreshed,
    TokenReplayDetected,
    FamilyRevoked,
    AuthorizationChecked,
    RoleUpdated,
    PolicyUpdated,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::UserLogin => "user_login",
            AuditEventType::UserLogout => "user_logout",
            AuditEventType::TokenRefreshed => "token_refreshed",
            AuditEventType::TokenReplayDetected => "token_replay_detected",
            AuditEventType::FamilyRevoked => "family_revoked",
            AuditEventType::AuthorizationChecked => "authorization_checked",
            AuditEventType::RoleUpdated => "role_updated",
            AuditEventType::PolicyUpdated => "policy_updated",
        }
    }
}

/// Audit log entry entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    /// Chain scope. Entries without a tenant share the global (null) chain.
    pub tenant_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub previous_hash: String,
    pub current_hash: String,
}

impl AuditEntry {
    /// Build a new entry linked to `previous_hash`, computing its own hash.
    #[allow(clippy::too_many_arguments)]
    pub fn link(
        tenant_id: Option<Uuid>,
        user_id: Option<Uuid>,
        event_type: AuditEventType,
        event_data: serde_json::Value,
        ip_address: Option<String>,
        user_agent: Option<String>,
        previous_hash: String,
    ) -> Self {
        let timestamp = Utc::now();
        let current_hash =
            entry_hash(&previous_hash, &event_data, event_type.as_str(), timestamp);
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            user_id,
            event_type: event_type.as_str().to_string(),
            event_data,
            ip_address,
            user_agent,
            timestamp,
            previous_hash,
            current_hash,
        }
    }

    /// Recompute this entry's hash from its recorded fields.
    #[must_use]
    pub fn recompute_hash(&self) -> String {
        entry_hash(
            &self.previous_hash,
            &self.event_data,
            &self.event_type,
            self.timestamp,
        )
    }
}

/// Hash formula shared by append and verification.
fn entry_hash(
    previous_hash: &str,
    event_data: &serde_json::Value,
    event_type: &str,
    timestamp: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(canonical_json(event_data).as_bytes());
    hasher.update(event_type.as_bytes());
    // Microsecond precision matches what the store round-trips.
    hasher.update(
        timestamp
            .to_rfc3339_opts(SecondsFormat::Micros, true)
            .as_bytes(),
    );
    hex::encode(hasher.finalize())
}

/// Serialize a JSON value with object keys in sorted order so the hash input
/// does not depend on map iteration order.
pub fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::Value::String(k.clone()),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let elems: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", elems.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"zulu": 1, "alpha": {"nested": [1, 2]}, "mike": "x"});
        assert_eq!(
            canonical_json(&a),
            r#"{"alpha":{"nested":[1,2]},"mike":"x","zulu":1}"#
        );
    }

    #[test]
    fn test_linked_entry_hash_roundtrip() {
        let entry = AuditEntry::link(
            Some(Uuid::new_v4()),
            Some(Uuid::new_v4()),
            AuditEventType::UserLogin,
            json!({"session_id": "abc"}),
            Some("10.0.0.1".to_string()),
            None,
            GENESIS_HASH.to_string(),
        );
        assert_eq!(entry.previous_hash, GENESIS_HASH);
        assert_eq!(entry.recompute_hash(), entry.current_hash);
    }

    #[test]
    fn test_tampered_payload_changes_hash() {
        let mut entry = AuditEntry::link(
            None,
            None,
            AuditEventType::UserLogout,
            json!({"session_id": "abc"}),
            None,
            None,
            GENESIS_HASH.to_string(),
        );
        entry.event_data = serde_json::json!({"session_id": "tampered"});
        assert_ne!(entry.recompute_hash(), entry.current_hash);
    }
}
