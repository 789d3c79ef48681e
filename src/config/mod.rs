use crate::services::ServiceError;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthzConfig {
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub cache: CacheConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub max_lifetime_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub private_key_path: String,
    pub public_key_path: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// TTL of policy decisions in the external KV store.
    pub policy_decision_ttl_seconds: u64,
    /// TTL of the engine's in-process decision cache.
    pub engine_decision_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// Upper bound on any external-store round trip during verification or
    /// resolution. On elapse the caller fails closed.
    pub store_timeout_ms: u64,
}

impl AuthzConfig {
    /// Bootstrap entry point for hosts: load `.env` if one is present, then
    /// read configuration from the environment.
    pub fn load() -> Result<Self, ServiceError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, ServiceError> {
        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| ServiceError::Config(e))?;

        let is_prod = environment == Environment::Prod;

        let config = AuthzConfig {
            environment,
            service_name: get_env("SERVICE_NAME", Some("authz-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
                acquire_timeout_seconds: parse_env("DATABASE_ACQUIRE_TIMEOUT_SECONDS", "30", is_prod)?,
                idle_timeout_seconds: parse_env("DATABASE_IDLE_TIMEOUT_SECONDS", "600", is_prod)?,
                max_lifetime_seconds: parse_env("DATABASE_MAX_LIFETIME_SECONDS", "1800", is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
            },
            jwt: JwtConfig {
                private_key_path: get_env("JWT_PRIVATE_KEY_PATH", None, is_prod)?,
                public_key_path: get_env("JWT_PUBLIC_KEY_PATH", None, is_prod)?,
                issuer: get_env("JWT_ISSUER", Some("authz-service"), is_prod)?,
                audience: get_env("JWT_AUDIENCE", Some("platform"), is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "15",
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    "7",
                    is_prod,
                )?,
            },
            cache: CacheConfig {
                policy_decision_ttl_seconds: parse_env(
                    "POLICY_DECISION_TTL_SECONDS",
                    "300",
                    is_prod,
                )?,
                engine_decision_ttl_seconds: parse_env(
                    "ENGINE_DECISION_TTL_SECONDS",
                    "30",
                    is_prod,
                )?,
            },
            timeouts: TimeoutConfig {
                store_timeout_ms: parse_env("STORE_TIMEOUT_MS", "2000", is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(ServiceError::Config(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive".to_string(),
            ));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(ServiceError::Config(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive".to_string(),
            ));
        }

        if self.jwt.issuer.is_empty() || self.jwt.audience.is_empty() {
            return Err(ServiceError::Config(
                "JWT_ISSUER and JWT_AUDIENCE must be non-empty".to_string(),
            ));
        }

        if self.timeouts.store_timeout_ms == 0 {
            return Err(ServiceError::Config(
                "STORE_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ServiceError::Config(
                "DATABASE_MIN_CONNECTIONS must not exceed DATABASE_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, ServiceError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(ServiceError::Config(format!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(ServiceError::Config(format!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, ServiceError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| ServiceError::Config(format!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
