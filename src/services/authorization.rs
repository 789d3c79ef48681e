//! Authorization engine: RBAC permission checks combined with policy
//! evaluation, fail-closed at every seam.

use crate::models::{AuditEventType, EvaluationContext, Membership};
use crate::services::{AuditChain, PermissionResolver, PolicyEvaluator, ServiceError};
use crate::store::AuthzStore;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A single access question posed to the engine.
#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub resource: String,
    pub action: String,
    /// Specific resource instance, when the question is about one.
    pub resource_id: Option<String>,
    /// Owner of that instance, for ownership-scoped permissions.
    pub resource_owner_id: Option<Uuid>,
    pub context: EvaluationContext,
}

/// The engine's answer, with the reason recorded for the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
    pub applied_policy_ids: Vec<Uuid>,
}

impl AccessDecision {
    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            applied_policy_ids: Vec::new(),
        }
    }
}

struct CachedDecision {
    decision: AccessDecision,
    expires_at: Instant,
}

/// Check a permission set against `resource:action`, in the fixed order:
/// exact, `*:action`, `resource:*`, `*:*`, then the admin overrides
/// `resource:admin` and `*:admin`.
pub fn check_permission(permissions: &HashSet<String>, resource: &str, action: &str) -> bool {
    permissions.contains(&format!("{}:{}", resource, action))
        || permissions.contains(&format!("*:{}", action))
        || permissions.contains(&format!("{}:*", resource))
        || permissions.contains("*:*")
        || permissions.contains(&format!("{}:admin", resource))
        || permissions.contains("*:admin")
}

pub struct AuthorizationEngine {
    store: Arc<dyn AuthzStore>,
    resolver: Arc<PermissionResolver>,
    evaluator: Arc<PolicyEvaluator>,
    audit: Arc<AuditChain>,
    decision_cache: DashMap<String, CachedDecision>,
    decision_ttl: Duration,
    store_timeout: Duration,
}

impl AuthorizationEngine {
    pub fn new(
        store: Arc<dyn AuthzStore>,
        resolver: Arc<PermissionResolver>,
        evaluator: Arc<PolicyEvaluator>,
        audit: Arc<AuditChain>,
        decision_ttl: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            resolver,
            evaluator,
            audit,
            decision_cache: DashMap::new(),
            decision_ttl,
            store_timeout,
        }
    }

    async fn membership(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<Membership>, ServiceError> {
        tokio::time::timeout(
            self.store_timeout,
            self.store.find_membership(user_id, tenant_id),
        )
        .await
        .map_err(|_| ServiceError::Timeout)?
        .map_err(ServiceError::from)
    }

    /// The union of a user's role-derived and custom permissions within a
    /// tenant. A missing or inactive membership yields the empty set, and so
    /// does any infrastructure failure along the way: callers only ever see
    /// a permission set, never a storage error.
    pub async fn get_effective_permissions(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> HashSet<String> {
        match self.effective_permissions(user_id, tenant_id).await {
            Ok(permissions) => permissions,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    user_id = %user_id,
                    tenant_id = %tenant_id,
                    "Permission resolution failed; treating as empty set"
                );
                HashSet::new()
            }
        }
    }

    async fn effective_permissions(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<HashSet<String>, ServiceError> {
        let Some(membership) = self.membership(user_id, tenant_id).await? else {
            return Ok(HashSet::new());
        };
        if !membership.is_active() {
            return Ok(HashSet::new());
        }

        let mut permissions = (*self.resolver.resolve(membership.role_id).await?).clone();
        permissions.extend(membership.custom_permissions.iter().cloned());
        Ok(permissions)
    }

    pub async fn has_any_permission(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        required: &[&str],
    ) -> bool {
        let permissions = self.get_effective_permissions(user_id, tenant_id).await;
        required.iter().any(|r| {
            r.split_once(':')
                .map_or(false, |(res, act)| check_permission(&permissions, res, act))
        })
    }

    pub async fn has_all_permissions(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        required: &[&str],
    ) -> bool {
        let permissions = self.get_effective_permissions(user_id, tenant_id).await;
        required.iter().all(|r| {
            r.split_once(':')
                .map_or(false, |(res, act)| check_permission(&permissions, res, act))
        })
    }

    /// Answer an access question, combining the RBAC permission check with
    /// policy evaluation. An explicit policy deny overrides everything; an
    /// allow from either side grants; the default is deny. Every decision is
    /// appended to the tenant's audit chain.
    ///
    /// Infrastructure failures anywhere in the check resolve to a deny with
    /// an opaque reason; no storage error detail reaches the caller.
    pub async fn is_authorized(&self, request: &AccessRequest) -> AccessDecision {
        match self.try_authorize(request).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    user_id = %request.user_id,
                    tenant_id = %request.tenant_id,
                    resource = %request.resource,
                    action = %request.action,
                    "Authorization check failed; denying"
                );
                AccessDecision::deny("authorization unavailable")
            }
        }
    }

    async fn try_authorize(&self, request: &AccessRequest) -> Result<AccessDecision, ServiceError> {
        let cache_key = self.cache_key(request);
        if let Some(cached) = self.decision_cache.get(&cache_key) {
            if cached.expires_at > Instant::now() {
                let decision = cached.decision.clone();
                drop(cached);
                self.record_decision(request, &decision, true).await?;
                return Ok(decision);
            }
        }

        let decision = self.decide(request).await?;

        self.decision_cache.insert(
            cache_key,
            CachedDecision {
                decision: decision.clone(),
                expires_at: Instant::now() + self.decision_ttl,
            },
        );
        self.record_decision(request, &decision, false).await?;
        Ok(decision)
    }

    async fn decide(&self, request: &AccessRequest) -> Result<AccessDecision, ServiceError> {
        let Some(membership) = self.membership(request.user_id, request.tenant_id).await? else {
            return Ok(AccessDecision::deny("no membership in tenant"));
        };
        if !membership.is_active() {
            return Ok(AccessDecision::deny("membership not active"));
        }

        let mut permissions = (*self.resolver.resolve(membership.role_id).await?).clone();
        permissions.extend(membership.custom_permissions.iter().cloned());

        let rbac_allowed = self.rbac_check(request, &permissions);

        let resource_ref = match request.resource_id.as_deref() {
            Some(id) => format!("{}:{}", request.resource, id),
            None => request.resource.clone(),
        };
        let policy = self
            .evaluator
            .evaluate(
                request.user_id,
                &[membership.role_id],
                &request.action,
                &resource_ref,
                &request.context,
                request.tenant_id,
            )
            .await?;

        let policy_denied = !policy.allowed && !policy.applied_policy_ids.is_empty();
        let decision = if policy_denied {
            AccessDecision {
                allowed: false,
                reason: "denied by policy".to_string(),
                applied_policy_ids: policy.applied_policy_ids,
            }
        } else if rbac_allowed {
            AccessDecision {
                allowed: true,
                reason: "granted by permission".to_string(),
                applied_policy_ids: policy.applied_policy_ids,
            }
        } else if policy.allowed {
            AccessDecision {
                allowed: true,
                reason: "granted by policy".to_string(),
                applied_policy_ids: policy.applied_policy_ids,
            }
        } else {
            AccessDecision {
                allowed: false,
                reason: "no permission or policy grants access".to_string(),
                applied_policy_ids: policy.applied_policy_ids,
            }
        };

        Ok(decision)
    }

    fn rbac_check(&self, request: &AccessRequest, permissions: &HashSet<String>) -> bool {
        if check_permission(permissions, &request.resource, &request.action) {
            return true;
        }

        if let Some(resource_id) = request.resource_id.as_deref() {
            if permissions.contains(&format!(
                "{}:{}:{}",
                request.resource, resource_id, request.action
            )) {
                return true;
            }
        }

        // Ownership-scoped grant: applies only when the caller owns the
        // instance in question.
        if request.resource_owner_id == Some(request.user_id)
            && permissions.contains(&format!("{}:own:{}", request.resource, request.action))
        {
            return true;
        }

        false
    }

    async fn record_decision(
        &self,
        request: &AccessRequest,
        decision: &AccessDecision,
        cached: bool,
    ) -> Result<(), ServiceError> {
        self.audit
            .append(
                Some(request.tenant_id),
                Some(request.user_id),
                AuditEventType::AuthorizationChecked,
                json!({
                    "resource": request.resource,
                    "action": request.action,
                    "resource_id": request.resource_id,
                    "allowed": decision.allowed,
                    "reason": decision.reason,
                    "cached": cached,
                }),
                request.context.ip_address.clone(),
                request.context.user_agent.clone(),
            )
            .await?;
        Ok(())
    }

    fn cache_key(&self, request: &AccessRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.user_id.as_bytes());
        hasher.update(request.tenant_id.as_bytes());
        hasher.update(request.resource.as_bytes());
        hasher.update(request.action.as_bytes());
        if let Some(id) = request.resource_id.as_deref() {
            hasher.update(id.as_bytes());
        }
        if let Some(owner) = request.resource_owner_id {
            hasher.update(owner.as_bytes());
        }
        hasher.update(request.context.cache_fingerprint().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Persist a role after rejecting hierarchy cycles, then invalidate
    /// every cache the role could have fed.
    pub async fn save_role(
        &self,
        role: &crate::models::Role,
        actor_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        self.resolver.validate_hierarchy(role).await?;
        tokio::time::timeout(self.store_timeout, self.store.save_role(role))
            .await
            .map_err(|_| ServiceError::Timeout)??;

        self.resolver.invalidate();
        self.decision_cache.clear();

        self.audit
            .append(
                Some(role.organization_id),
                actor_id,
                AuditEventType::RoleUpdated,
                json!({ "role_id": role.id, "name": role.name }),
                None,
                None,
            )
            .await?;
        Ok(())
    }

    /// Persist a policy, then invalidate cached decisions.
    pub async fn save_policy(
        &self,
        policy: &crate::models::Policy,
        actor_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        tokio::time::timeout(self.store_timeout, self.store.save_policy(policy))
            .await
            .map_err(|_| ServiceError::Timeout)??;

        self.evaluator.invalidate();
        self.decision_cache.clear();

        self.audit
            .append(
                Some(policy.tenant_id),
                actor_id,
                AuditEventType::PolicyUpdated,
                json!({ "policy_id": policy.id, "name": policy.name }),
                None,
                None,
            )
            .await?;
        Ok(())
    }
}
