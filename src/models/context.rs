//! Request context carried alongside authorization decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attributes of the request being authorized, consulted by policy
/// conditions. A BTreeMap keeps the canonical form deterministic for cache
/// key derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub mfa_verified: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self {
            ip_address: None,
            user_agent: None,
            mfa_verified: false,
            attributes: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }
}

impl EvaluationContext {
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Canonical digest input for decision caches.
    ///
    /// Only the fields conditions can observe participate: the raw timestamp
    /// is reduced to its hour (the granularity of time windows), so two
    /// requests moments apart share a cache entry instead of each minting a
    /// fresh key.
    pub fn cache_fingerprint(&self) -> String {
        use chrono::Timelike;
        super::canonical_json(&serde_json::json!({
            "attributes": self.attributes,
            "hour": self.timestamp.hour(),
            "ip": self.ip_address,
            "mfa": self.mfa_verified,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fingerprint_ignores_sub_hour_timestamp_drift() {
        let mut a = EvaluationContext::default();
        a.timestamp = Utc.with_ymd_and_hms(2026, 8, 25, 12, 0, 0).unwrap();
        let mut b = a.clone();
        b.timestamp = Utc.with_ymd_and_hms(2026, 8, 25, 12, 59, 58).unwrap();
        assert_eq!(a.cache_fingerprint(), b.cache_fingerprint());

        b.timestamp = Utc.with_ymd_and_hms(2026, 8, 25, 13, 0, 0).unwrap();
        assert_ne!(a.cache_fingerprint(), b.cache_fingerprint());
    }

    #[test]
    fn test_fingerprint_tracks_condition_inputs() {
        let base = EvaluationContext::default();
        let mfa = EvaluationContext {
            mfa_verified: true,
            ..base.clone()
        };
        assert_ne!(base.cache_fingerprint(), mfa.cache_fingerprint());

        let tagged = base.clone().with_attribute("department", serde_json::json!("ops"));
        assert_ne!(base.cache_fingerprint(), tagged.cache_fingerprint());
    }
}
