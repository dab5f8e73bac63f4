pub mod audit_event;
pub mod module;
pub mod permission;
pub mod role;
pub mod token;
pub mod user;

pub use audit_event::{AuditAction, AuditEvent, AuditFilter, NewAuditEvent, PageRequest, Paginated};
pub use module::{DeletionCause, Module, ModuleDraft, ModulePermission, ModuleWithPermissions};
pub use permission::{PermissionCode, PermissionKind};
pub use role::{Grant, GrantRequest, ModuleGrantSummary, ResolvedGrant, Role};
pub use token::TokenRecord;
pub use user::{Principal, User};
