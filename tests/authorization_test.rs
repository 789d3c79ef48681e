mod common;

use authz_service::models::{
    EvaluationContext, Membership, MembershipStatus, Policy, PolicyEffect, Role,
};
use authz_service::services::AccessRequest;
use authz_service::store::AuthzStore;
use uuid::Uuid;

fn request(user: Uuid, tenant: Uuid, resource: &str, action: &str) -> AccessRequest {
    AccessRequest {
        user_id: user,
        tenant_id: tenant,
        resource: resource.to_string(),
        action: action.to_string(),
        resource_id: None,
        resource_owner_id: None,
        context: EvaluationContext::default(),
    }
}

#[tokio::test]
async fn test_role_inheritance_grants_parent_permissions() {
    let platform = common::test_platform();
    let tenant = Uuid::new_v4();
    let user = Uuid::new_v4();

    let viewer = Role::new(tenant, "viewer", vec!["document:read".to_string()]);
    let editor = Role::with_parent(
        tenant,
        "editor",
        vec!["document:write".to_string()],
        viewer.id,
    );
    platform.store.save_role(&viewer).await.unwrap();
    platform.store.save_role(&editor).await.unwrap();
    platform
        .store
        .save_membership(&Membership::new(user, tenant, editor.id))
        .await
        .unwrap();

    let effective = platform.engine.get_effective_permissions(user, tenant).await;
    assert!(effective.contains("document:read"));
    assert!(effective.contains("document:write"));

    let decision = platform
        .engine
        .is_authorized(&request(user, tenant, "document", "read"))
        .await;
    assert!(decision.allowed);
}

#[tokio::test]
async fn test_missing_membership_denies() {
    let platform = common::test_platform();
    let decision = platform
        .engine
        .is_authorized(&request(Uuid::new_v4(), Uuid::new_v4(), "document", "read"))
        .await;
    assert!(!decision.allowed);
}

#[tokio::test]
async fn test_suspended_membership_denies_everything() {
    let platform = common::test_platform();
    let tenant = Uuid::new_v4();
    let user = Uuid::new_v4();

    let role = Role::new(tenant, "admin", vec!["*:*".to_string()]);
    platform.store.save_role(&role).await.unwrap();
    let mut membership = Membership::new(user, tenant, role.id);
    membership.status = MembershipStatus::Suspended;
    platform.store.save_membership(&membership).await.unwrap();

    assert!(platform
        .engine
        .get_effective_permissions(user, tenant)
        .await
        .is_empty());

    let decision = platform
        .engine
        .is_authorized(&request(user, tenant, "document", "read"))
        .await;
    assert!(!decision.allowed);
}

#[tokio::test]
async fn test_policy_deny_overrides_role_grant() {
    let platform = common::test_platform();
    let tenant = Uuid::new_v4();
    let user = Uuid::new_v4();

    let role = Role::new(tenant, "admin", vec!["*:*".to_string()]);
    platform.store.save_role(&role).await.unwrap();
    platform
        .store
        .save_membership(&Membership::new(user, tenant, role.id))
        .await
        .unwrap();

    let mut deny = Policy::new(tenant, "freeze-documents", PolicyEffect::Deny);
    deny.actions = vec!["delete".to_string()];
    deny.resource_pattern = Some("document*".to_string());
    platform.engine.save_policy(&deny, None).await.unwrap();

    let blocked = platform
        .engine
        .is_authorized(&request(user, tenant, "document", "delete"))
        .await;
    assert!(!blocked.allowed);
    assert_eq!(blocked.applied_policy_ids, vec![deny.id]);

    // Actions outside the deny's scope still pass on the role grant.
    let allowed = platform
        .engine
        .is_authorized(&request(user, tenant, "document", "read"))
        .await;
    assert!(allowed.allowed);
}

#[tokio::test]
async fn test_ownership_scoped_permission() {
    let platform = common::test_platform();
    let tenant = Uuid::new_v4();
    let user = Uuid::new_v4();
    let other = Uuid::new_v4();

    let role = Role::new(
        tenant,
        "member",
        vec!["organization:read".to_string(), "user:own:update".to_string()],
    );
    platform.store.save_role(&role).await.unwrap();
    platform
        .store
        .save_membership(&Membership::new(user, tenant, role.id))
        .await
        .unwrap();

    let mut own = request(user, tenant, "user", "update");
    own.resource_id = Some(user.to_string());
    own.resource_owner_id = Some(user);
    assert!(platform.engine.is_authorized(&own).await.allowed);

    let mut theirs = request(user, tenant, "user", "update");
    theirs.resource_id = Some(other.to_string());
    theirs.resource_owner_id = Some(other);
    assert!(!platform.engine.is_authorized(&theirs).await.allowed);
}

#[tokio::test]
async fn test_role_update_takes_effect_immediately() {
    let platform = common::test_platform();
    let tenant = Uuid::new_v4();
    let user = Uuid::new_v4();

    let mut role = Role::new(tenant, "member", vec!["document:read".to_string()]);
    platform.engine.save_role(&role, None).await.unwrap();
    platform
        .store
        .save_membership(&Membership::new(user, tenant, role.id))
        .await
        .unwrap();

    assert!(
        !platform
            .engine
            .is_authorized(&request(user, tenant, "document", "write"))
            .await
            .allowed
    );

    role.permission_strings.push("document:write".to_string());
    platform.engine.save_role(&role, None).await.unwrap();

    assert!(
        platform
            .engine
            .is_authorized(&request(user, tenant, "document", "write"))
            .await
            .allowed
    );
}

#[tokio::test]
async fn test_bulk_permission_checks() {
    let platform = common::test_platform();
    let tenant = Uuid::new_v4();
    let user = Uuid::new_v4();

    let role = Role::new(tenant, "member", vec!["document:read".to_string()]);
    platform.store.save_role(&role).await.unwrap();
    platform
        .store
        .save_membership(&Membership::new(user, tenant, role.id))
        .await
        .unwrap();

    assert!(
        platform
            .engine
            .has_any_permission(user, tenant, &["document:read", "document:write"])
            .await
    );
    assert!(
        !platform
            .engine
            .has_all_permissions(user, tenant, &["document:read", "document:write"])
            .await
    );
}
