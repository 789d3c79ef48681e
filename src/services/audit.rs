//! Tamper-evident audit chain.
//!
//! Appends are serialized per chain scope (tenant, or the global null scope)
//! so the previous-hash linkage never forks under concurrency. Verification
//! recomputes every hash and checks the linkage, reporting the first broken
//! entry.

use crate::models::{AuditEntry, AuditEventType, GENESIS_HASH};
use crate::services::ServiceError;
use crate::store::AuthzStore;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Result of verifying a chain slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    pub intact: bool,
    /// Index into the verified slice of the first entry whose hash or
    /// linkage does not hold.
    pub first_break_at: Option<usize>,
}

impl ChainVerification {
    fn intact() -> Self {
        Self {
            intact: true,
            first_break_at: None,
        }
    }

    fn broken_at(index: usize) -> Self {
        Self {
            intact: false,
            first_break_at: Some(index),
        }
    }
}

pub struct AuditChain {
    store: Arc<dyn AuthzStore>,
    scope_locks: DashMap<Option<Uuid>, Arc<Mutex<()>>>,
    store_timeout: Duration,
}

impl AuditChain {
    pub fn new(store: Arc<dyn AuthzStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            scope_locks: DashMap::new(),
            store_timeout,
        }
    }

    fn scope_lock(&self, tenant_id: Option<Uuid>) -> Arc<Mutex<()>> {
        Arc::clone(
            &self
                .scope_locks
                .entry(tenant_id)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Append an event to its scope's chain, linking from the current head
    /// (or the genesis sentinel for an empty chain).
    #[allow(clippy::too_many_arguments)]
    pub async fn append(
        &self,
        tenant_id: Option<Uuid>,
        user_id: Option<Uuid>,
        event_type: AuditEventType,
        event_data: serde_json::Value,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<AuditEntry, ServiceError> {
        let lock = self.scope_lock(tenant_id);
        let _guard = lock.lock().await;

        let head = tokio::time::timeout(self.store_timeout, self.store.latest_audit_entry(tenant_id))
            .await
            .map_err(|_| ServiceError::Timeout)??;
        let previous_hash = head
            .map(|entry| entry.current_hash)
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let entry = AuditEntry::link(
            tenant_id,
            user_id,
            event_type,
            event_data,
            ip_address,
            user_agent,
            previous_hash,
        );

        tokio::time::timeout(self.store_timeout, self.store.insert_audit_entry(&entry))
            .await
            .map_err(|_| ServiceError::Timeout)??;

        tracing::debug!(
            event_type = event_type.as_str(),
            entry_id = %entry.id,
            "Audit entry appended"
        );

        Ok(entry)
    }

    /// The most recent `limit` entries of a scope, oldest first.
    pub async fn recent_entries(
        &self,
        tenant_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, ServiceError> {
        let entries = tokio::time::timeout(
            self.store_timeout,
            self.store.recent_audit_entries(tenant_id, limit),
        )
        .await
        .map_err(|_| ServiceError::Timeout)??;
        Ok(entries)
    }

    /// Verify a contiguous chain slice in append order.
    ///
    /// Checks each entry's recomputed hash against its stored hash and its
    /// `previous_hash` against the predecessor's `current_hash`. When the
    /// slice starts at the chain head, the first entry must link from the
    /// genesis sentinel.
    pub fn verify_chain(entries: &[AuditEntry]) -> ChainVerification {
        for (index, entry) in entries.iter().enumerate() {
            if entry.recompute_hash() != entry.current_hash {
                return ChainVerification::broken_at(index);
            }

            let expected_previous = match index.checked_sub(1) {
                Some(prev) => entries[prev].current_hash.as_str(),
                None => GENESIS_HASH,
            };
            if entry.previous_hash != expected_previous {
                return ChainVerification::broken_at(index);
            }
        }

        ChainVerification::intact()
    }
}
