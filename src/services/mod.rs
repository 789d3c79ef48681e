//! Service layer: token lifecycle, sessions, permission resolution, policy
//! evaluation, the authorization engine, and the audit chain.

mod audit;
mod authorization;
mod error;
mod jwt;
mod kv;
mod permission;
mod policy;
mod session;
mod token;

pub use audit::{AuditChain, ChainVerification};
pub use authorization::{check_permission, AccessDecision, AccessRequest, AuthorizationEngine};
pub use error::ServiceError;
pub use jwt::{JwtService, SignedToken, TokenClaims, TokenKind};
pub use kv::{MemoryKv, RedisKv, TokenBlacklist};
pub use permission::PermissionResolver;
pub use policy::{glob_match, PolicyDecision, PolicyEvaluator};
pub use session::SessionService;
pub use token::{TokenPair, TokenService};
