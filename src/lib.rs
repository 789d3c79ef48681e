//! Multi-tenant authorization core: an RBAC/ABAC decision engine, JWT token
//! and session lifecycle management, and a tamper-evident audit chain.
//!
//! The crate is transport-free; hosts embed [`services::AuthorizationEngine`]
//! and [`services::TokenService`] behind whatever surface they expose.

pub mod config;
pub mod db;
pub mod health;
pub mod models;
pub mod observability;
pub mod services;
pub mod store;

pub use config::AuthzConfig;
pub use services::{
    AccessDecision, AccessRequest, AuditChain, AuthorizationEngine, JwtService,
    PermissionResolver, PolicyEvaluator, ServiceError, SessionService, TokenService,
};
pub use store::{AuthzStore, MemoryStore, PgStore, StoreError};
