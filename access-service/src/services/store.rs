//! Storage seams. Every mutation is atomic: implementations either apply
//! all of it or none of it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::ServiceError;
use crate::models::{
    AuditEvent, AuditFilter, GrantRequest, Module, ModuleDraft, ModuleWithPermissions,
    NewAuditEvent, PageRequest, PermissionCode, PermissionKind, Principal, ResolvedGrant, Role,
    User,
};

/// Permission catalog, module registry, roles and grants.
#[async_trait]
pub trait AccessStore: Send + Sync {
    async fn health_check(&self) -> Result<(), ServiceError>;

    async fn list_permission_kinds(&self) -> Result<Vec<PermissionKind>, ServiceError>;

    /// Insert modules with every permission kind available. Names must be
    /// unique (case-insensitive) among live modules and within the batch.
    async fn create_modules(
        &self,
        drafts: &[ModuleDraft],
        now: DateTime<Utc>,
    ) -> Result<Vec<ModuleWithPermissions>, ServiceError>;

    async fn list_modules(&self) -> Result<Vec<ModuleWithPermissions>, ServiceError>;

    async fn list_deleted_modules(&self) -> Result<Vec<Module>, ServiceError>;

    /// Live module with its available permissions.
    async fn find_module(&self, module_id: i64)
        -> Result<Option<ModuleWithPermissions>, ServiceError>;

    /// Replace the available set, withdrawing grants on pairs that drop out.
    async fn replace_module_permissions(
        &self,
        module_id: i64,
        permission_kind_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<ModuleWithPermissions, ServiceError>;

    async fn remove_module_permission(
        &self,
        module_id: i64,
        permission_kind_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError>;

    async fn soft_delete_module(&self, module_id: i64, now: DateTime<Utc>)
        -> Result<(), ServiceError>;

    async fn restore_module(&self, module_id: i64, now: DateTime<Utc>) -> Result<(), ServiceError>;

    async fn create_role(
        &self,
        name: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<Role, ServiceError>;

    async fn list_roles(&self) -> Result<Vec<Role>, ServiceError>;

    async fn find_role(&self, role_id: i64) -> Result<Option<Role>, ServiceError>;

    /// Hard delete; grants cascade. Fails with `Conflict` while users hold the role.
    async fn delete_role(&self, role_id: i64) -> Result<(), ServiceError>;

    /// All-or-nothing, idempotent grant. Serialized per role.
    async fn grant_permissions(
        &self,
        role_id: i64,
        requests: &[GrantRequest],
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError>;

    /// Soft-delete live grants of `role_id` on `module_id` (one kind, or all
    /// kinds when `permission_kind_id` is `None`). Returns rows affected.
    async fn revoke_grants(
        &self,
        role_id: i64,
        module_id: i64,
        permission_kind_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError>;

    async fn role_grants(&self, role_id: i64) -> Result<Vec<ResolvedGrant>, ServiceError>;

    /// Live grant on a live module with the permission still available.
    /// Module names compare case-insensitively.
    async fn has_grant(
        &self,
        role_id: i64,
        module_name: &str,
        code: PermissionCode,
    ) -> Result<bool, ServiceError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError>;

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<User>, ServiceError>;

    /// Active user joined with their role.
    async fn find_principal(&self, user_id: i64) -> Result<Option<Principal>, ServiceError>;

    async fn set_user_role(
        &self,
        user_id: i64,
        role_id: i64,
        now: DateTime<Utc>,
    ) -> Result<User, ServiceError>;
}

/// Revocation list for session tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Returns `false` when the token was already revoked.
    async fn revoke_token(&self, token: &str, expires_at: DateTime<Utc>)
        -> Result<bool, ServiceError>;

    async fn is_token_revoked(&self, token: &str) -> Result<bool, ServiceError>;

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, ServiceError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert_audit_event(&self, event: &NewAuditEvent) -> Result<(), ServiceError>;

    /// Newest first by `occurred_at`, then by id.
    async fn find_audit_events(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<(Vec<AuditEvent>, i64), ServiceError>;
}
