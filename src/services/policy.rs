//! Attribute/context-aware policy evaluation.
//!
//! Policies are gathered per tenant, filtered, and evaluated in priority
//! order. An explicit deny always wins and stops evaluation; an allow keeps
//! evaluating so a lower-priority deny can still override. The default with
//! no matching policy is deny.

use crate::models::{
    EvaluationContext, Policy, PolicyConditions, PolicyEffect, PolicyRule, PolicyTarget,
};
use crate::services::{ServiceError, TokenBlacklist};
use crate::store::AuthzStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Outcome of a policy evaluation, with the audit trail of every policy
/// considered, in evaluation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reasons: Vec<String>,
    pub applied_policy_ids: Vec<Uuid>,
    pub elapsed_ms: u64,
}

impl PolicyDecision {
    fn deny_default() -> Self {
        Self {
            allowed: false,
            reasons: Vec::new(),
            applied_policy_ids: Vec::new(),
            elapsed_ms: 0,
        }
    }
}

/// Glob-style matcher: `*` matches any run of characters, `?` exactly one.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    fn matches(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&p[1..], t) || (!t.is_empty() && matches(p, &t[1..]))
            }
            (Some(b'?'), Some(_)) => matches(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc == tc => matches(&p[1..], &t[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), text.as_bytes())
}

/// IPv4 containment for an exact address or CIDR range.
fn ip_in_range(range: &str, ip: &str) -> bool {
    let Ok(addr) = ip.parse::<Ipv4Addr>() else {
        return false;
    };

    match range.split_once('/') {
        Some((base, bits)) => {
            let (Ok(base), Ok(bits)) = (base.parse::<Ipv4Addr>(), bits.parse::<u32>()) else {
                return false;
            };
            if bits > 32 {
                return false;
            }
            let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
            (u32::from(addr) & mask) == (u32::from(base) & mask)
        }
        None => range.parse::<Ipv4Addr>().map_or(false, |r| r == addr),
    }
}

enum PolicyMatch {
    /// Policy matched with this effect (rules may override the policy's own).
    Matched(PolicyEffect),
    /// Policy did not apply, with the reason.
    Skipped(String),
}

pub struct PolicyEvaluator {
    store: Arc<dyn AuthzStore>,
    kv: Arc<dyn TokenBlacklist>,
    decision_ttl: Duration,
    store_timeout: Duration,
    /// Bumped on policy mutation; part of the cache key, so stale cached
    /// decisions become unreachable and age out via their TTL.
    epoch: AtomicU64,
}

impl PolicyEvaluator {
    pub fn new(
        store: Arc<dyn AuthzStore>,
        kv: Arc<dyn TokenBlacklist>,
        decision_ttl: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            kv,
            decision_ttl,
            store_timeout,
            epoch: AtomicU64::new(0),
        }
    }

    /// Invalidate cached decisions after a policy mutation.
    pub fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Evaluate all applicable policies for a request.
    ///
    /// `role_ids` are the subject's roles within the tenant, used to gather
    /// role-attached policies.
    pub async fn evaluate(
        &self,
        subject: Uuid,
        role_ids: &[Uuid],
        action: &str,
        resource: &str,
        context: &EvaluationContext,
        tenant_id: Uuid,
    ) -> Result<PolicyDecision, ServiceError> {
        let started = Instant::now();
        let cache_key = self.cache_key(tenant_id, subject, action, resource, context);

        match self.kv.get_cache(&cache_key).await {
            Ok(Some(cached)) => {
                if let Ok(decision) = serde_json::from_str::<PolicyDecision>(&cached) {
                    return Ok(decision);
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(error = %e, "Policy cache read failed; evaluating");
            }
        }

        let policies = tokio::time::timeout(
            self.store_timeout,
            self.store.policies_for_tenant(tenant_id),
        )
        .await
        .map_err(|_| ServiceError::Timeout)??;

        let candidates = gather_candidates(policies, subject, role_ids, resource, tenant_id);

        let mut decision = PolicyDecision::deny_default();
        for policy in &candidates {
            match match_policy(policy, subject, action, resource, context) {
                PolicyMatch::Matched(PolicyEffect::Deny) => {
                    decision.allowed = false;
                    decision
                        .reasons
                        .push(format!("policy '{}': matched (deny)", policy.name));
                    decision.applied_policy_ids.push(policy.id);
                    // Explicit deny always wins and terminates evaluation.
                    break;
                }
                PolicyMatch::Matched(PolicyEffect::Allow) => {
                    decision.allowed = true;
                    decision
                        .reasons
                        .push(format!("policy '{}': matched (allow)", policy.name));
                    decision.applied_policy_ids.push(policy.id);
                }
                PolicyMatch::Skipped(reason) => {
                    decision
                        .reasons
                        .push(format!("policy '{}': skipped ({})", policy.name, reason));
                }
            }
        }

        decision.elapsed_ms = started.elapsed().as_millis() as u64;

        if let Ok(serialized) = serde_json::to_string(&decision) {
            if let Err(e) = self
                .kv
                .set_cache(&cache_key, &serialized, self.decision_ttl.as_secs() as i64)
                .await
            {
                tracing::debug!(error = %e, "Policy cache write failed");
            }
        }

        Ok(decision)
    }

    fn cache_key(
        &self,
        tenant_id: Uuid,
        subject: Uuid,
        action: &str,
        resource: &str,
        context: &EvaluationContext,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.epoch.load(Ordering::SeqCst).to_be_bytes());
        hasher.update(tenant_id.as_bytes());
        hasher.update(subject.as_bytes());
        hasher.update(action.as_bytes());
        hasher.update(resource.as_bytes());
        hasher.update(context.cache_fingerprint().as_bytes());
        format!("authz:decision:{}", hex::encode(hasher.finalize()))
    }
}

/// Gather candidates in the fixed order: subject-targeted, role-attached,
/// tenant-wide, then resource-pattern matches; drop disabled or expired
/// policies; sort by priority descending. The sort is stable, so equal
/// priorities keep the gather order.
fn gather_candidates(
    policies: Vec<Policy>,
    subject: Uuid,
    role_ids: &[Uuid],
    resource: &str,
    tenant_id: Uuid,
) -> Vec<Policy> {
    let now = chrono::Utc::now();
    let mut seen = std::collections::HashSet::new();
    let mut candidates = Vec::new();

    let buckets: [&dyn Fn(&Policy) -> bool; 4] = [
        &|p| p.target_type == PolicyTarget::User && p.target_id == Some(subject),
        &|p| {
            p.target_type == PolicyTarget::Role
                && p.target_id.map_or(false, |id| role_ids.contains(&id))
        },
        // Tenant-wide: an organization policy may leave target_id empty or
        // name its own tenant.
        &|p| {
            p.target_type == PolicyTarget::Organization
                && p.target_id.map_or(true, |id| id == tenant_id)
        },
        &|p| {
            p.resource_pattern
                .as_deref()
                .map_or(false, |pat| glob_match(pat, resource))
        },
    ];

    for bucket in buckets {
        for policy in policies.iter().filter(|p| bucket(p)) {
            if policy.is_applicable(now) && seen.insert(policy.id) {
                candidates.push(policy.clone());
            }
        }
    }

    candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
    candidates
}

fn match_policy(
    policy: &Policy,
    subject: Uuid,
    action: &str,
    resource: &str,
    context: &EvaluationContext,
) -> PolicyMatch {
    if !policy.actions.is_empty()
        && !policy
            .actions
            .iter()
            .any(|a| a == action || a == "*")
    {
        return PolicyMatch::Skipped(format!("action '{}' not covered", action));
    }

    if let Some(resource_type) = policy.resource_type.as_deref() {
        let type_prefix = format!("{}:", resource_type);
        if resource != resource_type && !resource.starts_with(&type_prefix) {
            return PolicyMatch::Skipped(format!("resource type '{}' does not apply", resource_type));
        }
    }

    if let Some(pattern) = policy.resource_pattern.as_deref() {
        if !glob_match(pattern, resource) {
            return PolicyMatch::Skipped(format!("resource pattern '{}' does not match", pattern));
        }
    }

    if let Err(reason) = check_conditions(&policy.conditions, context) {
        return PolicyMatch::Skipped(reason);
    }

    if policy.rules.is_empty() {
        return PolicyMatch::Matched(policy.effect);
    }

    match interpret_rules(&policy.rules, subject, action, resource) {
        Some(effect) => PolicyMatch::Matched(effect),
        None => PolicyMatch::Skipped("no rule matched".to_string()),
    }
}

fn check_conditions(
    conditions: &PolicyConditions,
    context: &EvaluationContext,
) -> Result<(), String> {
    if let Some(range) = conditions.ip_range.as_deref() {
        let in_range = context
            .ip_address
            .as_deref()
            .map_or(false, |ip| ip_in_range(range, ip));
        if !in_range {
            return Err(format!("ip not in range {}", range));
        }
    }

    if let Some(window) = &conditions.time_window {
        use chrono::Timelike;
        let hour = context.timestamp.hour() as u8;
        if !window.contains_hour(hour) {
            return Err(format!(
                "outside time window {:02}-{:02}",
                window.start_hour, window.end_hour
            ));
        }
    }

    if conditions.mfa_required == Some(true) && !context.mfa_verified {
        return Err("mfa required".to_string());
    }

    for (key, expected) in &conditions.attributes {
        match context.attributes.get(key) {
            Some(actual) if actual == expected => {}
            _ => return Err(format!("attribute '{}' mismatch", key)),
        }
    }

    Ok(())
}

/// Interpret the embedded sub-rules: the first rule whose predicates all
/// match decides the effect.
fn interpret_rules(
    rules: &[PolicyRule],
    subject: Uuid,
    action: &str,
    resource: &str,
) -> Option<PolicyEffect> {
    let subject_str = subject.to_string();
    rules
        .iter()
        .find(|rule| {
            rule.subject_pattern
                .as_deref()
                .map_or(true, |p| glob_match(p, &subject_str))
                && rule
                    .action_pattern
                    .as_deref()
                    .map_or(true, |p| glob_match(p, action))
                && rule
                    .resource_pattern
                    .as_deref()
                    .map_or(true, |p| glob_match(p, resource))
        })
        .map(|rule| rule.effect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryKv;
    use crate::store::MemoryStore;

    fn evaluator(store: Arc<MemoryStore>) -> PolicyEvaluator {
        PolicyEvaluator::new(
            store,
            Arc::new(MemoryKv::new()),
            Duration::from_secs(300),
            Duration::from_secs(2),
        )
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("doc-*", "doc-123"));
        assert!(glob_match("doc-?", "doc-1"));
        assert!(!glob_match("doc-?", "doc-12"));
        assert!(!glob_match("doc-*", "img-12"));
        assert!(glob_match("a*c", "abbbc"));
    }

    #[test]
    fn test_ip_in_range() {
        assert!(ip_in_range("10.0.0.0/8", "10.1.2.3"));
        assert!(!ip_in_range("10.0.0.0/8", "11.1.2.3"));
        assert!(ip_in_range("192.168.1.10", "192.168.1.10"));
        assert!(!ip_in_range("192.168.1.10", "192.168.1.11"));
        assert!(!ip_in_range("not-an-ip", "10.0.0.1"));
    }

    #[tokio::test]
    async fn test_deny_overrides_allow_regardless_of_priority() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let subject = Uuid::new_v4();

        let mut allow = Policy::new(tenant, "broad-allow", PolicyEffect::Allow);
        allow.priority = 10;
        let mut deny = Policy::new(tenant, "narrow-deny", PolicyEffect::Deny);
        deny.priority = 1;
        store.save_policy(&allow).await.unwrap();
        store.save_policy(&deny).await.unwrap();

        let evaluator = evaluator(store);
        let decision = evaluator
            .evaluate(
                subject,
                &[],
                "read",
                "document:1",
                &EvaluationContext::default(),
                tenant,
            )
            .await
            .unwrap();

        assert!(!decision.allowed);
        assert_eq!(decision.applied_policy_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_default_is_deny_with_no_policies() {
        let store = Arc::new(MemoryStore::new());
        let evaluator = evaluator(store);
        let decision = evaluator
            .evaluate(
                Uuid::new_v4(),
                &[],
                "read",
                "document:1",
                &EvaluationContext::default(),
                Uuid::new_v4(),
            )
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert!(decision.reasons.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_policy_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();

        let mut allow = Policy::new(tenant, "disabled-allow", PolicyEffect::Allow);
        allow.enabled = false;
        store.save_policy(&allow).await.unwrap();

        let evaluator = evaluator(store);
        let decision = evaluator
            .evaluate(
                Uuid::new_v4(),
                &[],
                "read",
                "document:1",
                &EvaluationContext::default(),
                tenant,
            )
            .await
            .unwrap();
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_mfa_condition_gates_allow() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();

        let mut allow = Policy::new(tenant, "mfa-allow", PolicyEffect::Allow);
        allow.conditions.mfa_required = Some(true);
        store.save_policy(&allow).await.unwrap();

        let evaluator = evaluator(store);
        let subject = Uuid::new_v4();

        let without_mfa = evaluator
            .evaluate(
                subject,
                &[],
                "read",
                "document:1",
                &EvaluationContext::default(),
                tenant,
            )
            .await
            .unwrap();
        assert!(!without_mfa.allowed);

        let ctx = EvaluationContext {
            mfa_verified: true,
            ..Default::default()
        };
        let with_mfa = evaluator
            .evaluate(subject, &[], "read", "document:1", &ctx, tenant)
            .await
            .unwrap();
        assert!(with_mfa.allowed);
    }

    #[tokio::test]
    async fn test_rule_ast_overrides_policy_effect() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();

        let mut policy = Policy::new(tenant, "rule-based", PolicyEffect::Allow);
        policy.rules = vec![
            PolicyRule {
                effect: PolicyEffect::Deny,
                subject_pattern: None,
                action_pattern: Some("delete".to_string()),
                resource_pattern: None,
            },
            PolicyRule {
                effect: PolicyEffect::Allow,
                subject_pattern: None,
                action_pattern: Some("*".to_string()),
                resource_pattern: None,
            },
        ];
        store.save_policy(&policy).await.unwrap();

        let evaluator = evaluator(store);
        let subject = Uuid::new_v4();

        let delete = evaluator
            .evaluate(
                subject,
                &[],
                "delete",
                "document:1",
                &EvaluationContext::default(),
                tenant,
            )
            .await
            .unwrap();
        assert!(!delete.allowed);

        let read = evaluator
            .evaluate(
                subject,
                &[],
                "read",
                "document:1",
                &EvaluationContext::default(),
                tenant,
            )
            .await
            .unwrap();
        assert!(read.allowed);
    }

    #[tokio::test]
    async fn test_organization_policy_naming_its_tenant_is_gathered() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();

        let mut deny = Policy::new(tenant, "tenant-wide-deny", PolicyEffect::Deny);
        deny.target_id = Some(tenant);
        store.save_policy(&deny).await.unwrap();

        let evaluator = evaluator(store);
        let decision = evaluator
            .evaluate(
                Uuid::new_v4(),
                &[],
                "read",
                "document:1",
                &EvaluationContext::default(),
                tenant,
            )
            .await
            .unwrap();

        assert!(!decision.allowed);
        assert_eq!(decision.applied_policy_ids, vec![deny.id]);
    }

    #[tokio::test]
    async fn test_fresh_contexts_share_a_cache_entry() {
        use chrono::TimeZone;

        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let subject = Uuid::new_v4();

        let allow = Policy::new(tenant, "allow-all", PolicyEffect::Allow);
        store.save_policy(&allow).await.unwrap();

        let evaluator = evaluator(Arc::clone(&store));

        let mut first_ctx = EvaluationContext::default();
        first_ctx.timestamp = chrono::Utc.with_ymd_and_hms(2026, 8, 25, 12, 0, 0).unwrap();
        let first = evaluator
            .evaluate(subject, &[], "read", "document:1", &first_ctx, tenant)
            .await
            .unwrap();
        assert!(first.allowed);

        // Disable the policy; a second request moments later must still be
        // answered from cache despite its new timestamp.
        let mut disabled = allow.clone();
        disabled.enabled = false;
        store.save_policy(&disabled).await.unwrap();

        let mut second_ctx = EvaluationContext::default();
        second_ctx.timestamp = chrono::Utc.with_ymd_and_hms(2026, 8, 25, 12, 0, 30).unwrap();
        let second = evaluator
            .evaluate(subject, &[], "read", "document:1", &second_ctx, tenant)
            .await
            .unwrap();
        assert!(second.allowed);
    }

    #[tokio::test]
    async fn test_cached_decision_survives_until_invalidation() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let subject = Uuid::new_v4();

        let allow = Policy::new(tenant, "allow-all", PolicyEffect::Allow);
        store.save_policy(&allow).await.unwrap();

        let evaluator = evaluator(Arc::clone(&store));
        let ctx = EvaluationContext::default();

        let first = evaluator
            .evaluate(subject, &[], "read", "document:1", &ctx, tenant)
            .await
            .unwrap();
        assert!(first.allowed);

        // Disable the policy; the cached decision still answers.
        let mut disabled = allow.clone();
        disabled.enabled = false;
        store.save_policy(&disabled).await.unwrap();

        let cached = evaluator
            .evaluate(subject, &[], "read", "document:1", &ctx, tenant)
            .await
            .unwrap();
        assert!(cached.allowed);

        evaluator.invalidate();
        let fresh = evaluator
            .evaluate(subject, &[], "read", "document:1", &ctx, tenant)
            .await
            .unwrap();
        assert!(!fresh.allowed);
    }
}
