//! Composed readiness report over the crate's external dependencies.

use crate::services::TokenBlacklist;
use serde::Serialize;
use sqlx::PgPool;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub database: bool,
    pub kv: bool,
}

/// Probe PostgreSQL and the key-value store. Failures are reported, not
/// propagated; hosts decide what an unhealthy report means for them.
pub async fn check(pool: &PgPool, kv: &dyn TokenBlacklist) -> HealthReport {
    let database = match crate::db::health_check(pool).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            false
        }
    };

    let kv_ok = match kv.health_check().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Key-value store health check failed");
            false
        }
    };

    HealthReport {
        healthy: database && kv_ok,
        database,
        kv: kv_ok,
    }
}
