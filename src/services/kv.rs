//! External key-value store seam: token blacklist and decision cache.
//!
//! The store is shared across process instances; every write here is
//! idempotent, so re-blacklisting an already-blacklisted jti is a no-op.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    /// Blacklist a jti for the remaining lifetime of its token.
    async fn blacklist_token(&self, jti: &str, ttl_seconds: i64) -> Result<(), anyhow::Error>;

    async fn is_blacklisted(&self, jti: &str) -> Result<bool, anyhow::Error>;

    async fn set_cache(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: i64,
    ) -> Result<(), anyhow::Error>;

    async fn get_cache(&self, key: &str) -> Result<Option<String>, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// Redis-backed implementation using a reconnecting connection manager.
#[derive(Clone)]
pub struct RedisKv {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisKv {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %config.url, "Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }

    fn blacklist_key(jti: &str) -> String {
        format!("blacklist:{}", jti)
    }
}

#[async_trait]
impl TokenBlacklist for RedisKv {
    async fn blacklist_token(&self, jti: &str, ttl_seconds: i64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(Self::blacklist_key(jti))
            .arg("1")
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to blacklist token: {}", e))
    }

    async fn is_blacklisted(&self, jti: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(Self::blacklist_key(jti))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to check blacklist: {}", e))?;
        Ok(exists)
    }

    async fn set_cache(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache: {}", e))
    }

    async fn get_cache(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get cache: {}", e))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-memory implementation for tests and local development. TTLs are
/// ignored; the test suite never outlives them.
#[derive(Default)]
pub struct MemoryKv {
    blacklisted: Mutex<HashSet<String>>,
    cache: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenBlacklist for MemoryKv {
    async fn blacklist_token(&self, jti: &str, _ttl_seconds: i64) -> Result<(), anyhow::Error> {
        self.blacklisted
            .lock()
            .map_err(|e| anyhow::anyhow!("Blacklist mutex poisoned: {}", e))?
            .insert(jti.to_string());
        Ok(())
    }

    async fn is_blacklisted(&self, jti: &str) -> Result<bool, anyhow::Error> {
        Ok(self
            .blacklisted
            .lock()
            .map_err(|e| anyhow::anyhow!("Blacklist mutex poisoned: {}", e))?
            .contains(jti))
    }

    async fn set_cache(
        &self,
        key: &str,
        value: &str,
        _ttl_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        self.cache
            .lock()
            .map_err(|e| anyhow::anyhow!("Cache mutex poisoned: {}", e))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_cache(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(self
            .cache
            .lock()
            .map_err(|e| anyhow::anyhow!("Cache mutex poisoned: {}", e))?
            .get(key)
            .cloned())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
