use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Key-value store error: {0}")]
    Kv(anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token replay detected; refresh token family revoked")]
    TokenReplay,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session does not belong to the requesting user")]
    NotSessionOwner,

    #[error("Membership is not active")]
    MembershipInactive,

    #[error("Role hierarchy contains a cycle at role {0}")]
    RoleCycle(uuid::Uuid),

    #[error("External store timed out")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
