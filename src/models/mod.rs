//! Domain entities for the authorization core.

mod audit;
mod context;
mod membership;
mod policy;
mod role;
mod session;

pub use audit::{canonical_json, AuditEntry, AuditEventType, GENESIS_HASH};
pub use context::EvaluationContext;
pub use membership::{Membership, MembershipStatus};
pub use policy::{Policy, PolicyConditions, PolicyEffect, PolicyRule, PolicyTarget, TimeWindow};
pub use role::Role;
pub use session::{Session, SessionInfo};
