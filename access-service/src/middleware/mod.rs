pub mod audit;
pub mod auth;
pub mod authz;

pub use audit::{audit_middleware, AuditContext, AuditScope};
pub use auth::{auth_middleware, AuthUser, BearerToken};
pub use authz::{permission_gate, Gate};
