//! Permission resolution over the role hierarchy.

use crate::services::ServiceError;
use crate::store::AuthzStore;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Resolves a role's effective permission set by walking its parent chain,
/// child first, unioning each role's direct permission strings.
///
/// Resolved sets are cached keyed by role id with no automatic expiry; the
/// cache is invalidated explicitly when a role is mutated. Resolution is
/// deterministic for a given role tree, so concurrent populations of the
/// same entry may race and last-writer-wins.
pub struct PermissionResolver {
    store: Arc<dyn AuthzStore>,
    cache: DashMap<Uuid, Arc<HashSet<String>>>,
    store_timeout: Duration,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn AuthzStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            store_timeout,
        }
    }

    /// Resolve the effective permission set of a role.
    ///
    /// A missing role resolves to the empty set. A parent chain that loops
    /// back on itself terminates at the revisit; the loop itself is rejected
    /// at mutation time by [`validate_hierarchy`](Self::validate_hierarchy).
    pub async fn resolve(&self, role_id: Uuid) -> Result<Arc<HashSet<String>>, ServiceError> {
        if let Some(cached) = self.cache.get(&role_id) {
            return Ok(Arc::clone(&cached));
        }

        let mut permissions = HashSet::new();
        let mut visited = HashSet::new();
        let mut current = Some(role_id);

        while let Some(id) = current {
            if !visited.insert(id) {
                tracing::warn!(role_id = %id, "Role parent chain revisited a role; stopping walk");
                break;
            }

            let role = tokio::time::timeout(self.store_timeout, self.store.find_role(id))
                .await
                .map_err(|_| ServiceError::Timeout)??;

            match role {
                Some(role) => {
                    permissions.extend(role.permission_strings.iter().cloned());
                    current = role.parent_role_id;
                }
                None => break,
            }
        }

        let resolved = Arc::new(permissions);
        self.cache.insert(role_id, Arc::clone(&resolved));
        Ok(resolved)
    }

    /// Drop every cached resolution. Fired on role mutation: an edited role
    /// changes the resolved set of all of its descendants, and the cache is
    /// not reverse-indexed.
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    /// Reject a role write whose parent chain would contain a cycle.
    pub async fn validate_hierarchy(&self, role: &crate::models::Role) -> Result<(), ServiceError> {
        let mut visited = HashSet::from([role.id]);
        let mut current = role.parent_role_id;

        while let Some(id) = current {
            if !visited.insert(id) {
                return Err(ServiceError::RoleCycle(id));
            }
            current = match self.store.find_role(id).await? {
                Some(parent) => parent.parent_role_id,
                None => None,
            };
        }

        Ok(())
    }
}
