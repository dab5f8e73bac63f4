//! Services layer for access-service.
//!
//! Storage seams and their PostgreSQL and in-memory backings, the authorizer,
//! session authority, audit recorder and the management services.

pub mod access;
pub mod audit;
pub mod audit_query;
pub mod auth;
pub mod authz;
pub mod clock;
pub mod database;
pub mod error;
pub mod jwt;
pub mod memory;
pub mod metrics;
pub mod registry;
pub mod session;
pub mod store;

use std::sync::Arc;

pub use access::{AccessControlService, RolePermissions, UserPermissions};
pub use audit::{redact, AuditRecorder};
pub use audit_query::AuditLogService;
pub use auth::{AuthService, LoginOutcome};
pub use authz::{Authorizer, Decision, DenyReason, RoleChange};
pub use clock::{Clock, ManualClock, SystemClock};
pub use database::Database;
pub use error::{ServiceError, TokenError};
pub use jwt::{JwtService, SessionClaims};
pub use memory::MemoryStore;
pub use session::SessionAuthority;
pub use store::{AccessStore, AuditStore, TokenStore, UserStore};

/// The four storage seams, backed by one implementation.
#[derive(Clone)]
pub struct Stores {
    pub access: Arc<dyn AccessStore>,
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub audit: Arc<dyn AuditStore>,
}

impl Stores {
    pub fn postgres(db: Database) -> Self {
        let db = Arc::new(db);
        Self {
            access: db.clone(),
            users: db.clone(),
            tokens: db.clone(),
            audit: db,
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            access: store.clone(),
            users: store.clone(),
            tokens: store.clone(),
            audit: store,
        }
    }
}
