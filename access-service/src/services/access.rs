//! Registry, role and grant management on top of [`AccessStore`].

use serde::Serialize;
use std::sync::Arc;

use super::store::{AccessStore, UserStore};
use super::{Clock, ServiceError};
use crate::models::{
    GrantRequest, Module, ModuleDraft, ModuleGrantSummary, ModuleWithPermissions, PermissionKind,
    ResolvedGrant, Role, User,
};

/// A user's role with its grants grouped per module.
#[derive(Debug, Clone, Serialize)]
pub struct UserPermissions {
    pub user_id: i64,
    pub full_name: String,
    pub email: String,
    pub role: RolePermissions,
}

#[derive(Debug, Clone, Serialize)]
pub struct RolePermissions {
    pub id: i64,
    pub name: String,
    pub modules: Vec<ModuleGrantSummary>,
}

#[derive(Clone)]
pub struct AccessControlService {
    store: Arc<dyn AccessStore>,
    users: Arc<dyn UserStore>,
    clock: Arc<dyn Clock>,
    superuser_role: String,
}

impl AccessControlService {
    pub fn new(
        store: Arc<dyn AccessStore>,
        users: Arc<dyn UserStore>,
        clock: Arc<dyn Clock>,
        superuser_role: impl Into<String>,
    ) -> Self {
        Self {
            store,
            users,
            clock,
            superuser_role: superuser_role.into(),
        }
    }

    pub async fn list_permission_kinds(&self) -> Result<Vec<PermissionKind>, ServiceError> {
        self.store.list_permission_kinds().await
    }

    #[tracing::instrument(skip(self, drafts), fields(count = drafts.len()))]
    pub async fn create_modules(
        &self,
        drafts: &[ModuleDraft],
    ) -> Result<Vec<ModuleWithPermissions>, ServiceError> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        let created = self.store.create_modules(drafts, self.clock.now()).await?;
        tracing::info!(count = created.len(), "Modules created");
        Ok(created)
    }

    pub async fn list_modules(&self) -> Result<Vec<ModuleWithPermissions>, ServiceError> {
        self.store.list_modules().await
    }

    pub async fn list_deleted_modules(&self) -> Result<Vec<Module>, ServiceError> {
        self.store.list_deleted_modules().await
    }

    pub async fn get_module(&self, module_id: i64) -> Result<ModuleWithPermissions, ServiceError> {
        self.store
            .find_module(module_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Module {}", module_id)))
    }

    /// Replace the available set; grants on withdrawn pairs go with it.
    #[tracing::instrument(skip(self))]
    pub async fn set_module_available_permissions(
        &self,
        module_id: i64,
        permission_kind_ids: &[i64],
    ) -> Result<ModuleWithPermissions, ServiceError> {
        self.store
            .replace_module_permissions(module_id, permission_kind_ids, self.clock.now())
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_module_permission(
        &self,
        module_id: i64,
        permission_kind_id: i64,
    ) -> Result<(), ServiceError> {
        self.store
            .remove_module_permission(module_id, permission_kind_id, self.clock.now())
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn soft_delete_module(&self, module_id: i64) -> Result<(), ServiceError> {
        self.store
            .soft_delete_module(module_id, self.clock.now())
            .await?;
        tracing::info!(module_id, "Module soft-deleted");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn restore_module(&self, module_id: i64) -> Result<ModuleWithPermissions, ServiceError> {
        self.store.restore_module(module_id, self.clock.now()).await?;
        tracing::info!(module_id, "Module restored");
        self.get_module(module_id).await
    }

    #[tracing::instrument(skip(self, description))]
    pub async fn create_role(&self, name: &str, description: &str) -> Result<Role, ServiceError> {
        self.store
            .create_role(name, description, self.clock.now())
            .await
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>, ServiceError> {
        self.store.list_roles().await
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_role(&self, role_id: i64) -> Result<(), ServiceError> {
        let role = self.require_role(role_id).await?;
        self.reject_superuser(&role)?;
        self.store.delete_role(role_id).await
    }

    /// All-or-nothing. Already granted triples are left as they are.
    #[tracing::instrument(skip(self, requests))]
    pub async fn grant_role_permissions(
        &self,
        role_id: i64,
        requests: &[GrantRequest],
    ) -> Result<Vec<ResolvedGrant>, ServiceError> {
        let role = self.require_role(role_id).await?;
        self.reject_superuser(&role)?;

        self.store
            .grant_permissions(role_id, requests, self.clock.now())
            .await?;
        self.store.role_grants(role_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn revoke_grant(
        &self,
        role_id: i64,
        module_id: i64,
        permission_kind_id: i64,
    ) -> Result<(), ServiceError> {
        self.revoke(role_id, module_id, Some(permission_kind_id)).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn revoke_module_from_role(
        &self,
        role_id: i64,
        module_id: i64,
    ) -> Result<(), ServiceError> {
        self.revoke(role_id, module_id, None).await
    }

    pub async fn get_role_grants(&self, role_id: i64) -> Result<Vec<ResolvedGrant>, ServiceError> {
        self.require_role(role_id).await?;
        self.store.role_grants(role_id).await
    }

    /// Move a user to another role. The self-demotion check happens in the
    /// authorization step before this is called.
    #[tracing::instrument(skip(self))]
    pub async fn assign_user_role(&self, user_id: i64, role_id: i64) -> Result<User, ServiceError> {
        self.require_role(role_id).await?;
        let user = self
            .users
            .set_user_role(user_id, role_id, self.clock.now())
            .await?;
        tracing::info!(user_id, role_id, "User role changed");
        Ok(user)
    }

    pub async fn find_user(&self, user_id: i64) -> Result<User, ServiceError> {
        self.users
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("User {}", user_id)))
    }

    pub async fn user_permissions(&self, user_id: i64) -> Result<UserPermissions, ServiceError> {
        let user = self.find_user(user_id).await?;
        let role = self.require_role(user.role_id).await?;
        let grants = self.store.role_grants(role.id).await?;

        Ok(UserPermissions {
            user_id: user.id,
            full_name: user.full_name,
            email: user.email,
            role: RolePermissions {
                id: role.id,
                name: role.name,
                modules: ModuleGrantSummary::collect(&grants),
            },
        })
    }

    async fn revoke(
        &self,
        role_id: i64,
        module_id: i64,
        permission_kind_id: Option<i64>,
    ) -> Result<(), ServiceError> {
        let role = self.require_role(role_id).await?;
        self.reject_superuser(&role)?;

        let revoked = self
            .store
            .revoke_grants(role_id, module_id, permission_kind_id, self.clock.now())
            .await?;
        if revoked == 0 {
            return Err(ServiceError::not_found(format!(
                "Grant for role {} on module {}",
                role_id, module_id
            )));
        }
        tracing::info!(role_id, module_id, revoked, "Grants revoked");
        Ok(())
    }

    async fn require_role(&self, role_id: i64) -> Result<Role, ServiceError> {
        self.store
            .find_role(role_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Role {}", role_id)))
    }

    fn reject_superuser(&self, role: &Role) -> Result<(), ServiceError> {
        if role.name.eq_ignore_ascii_case(&self.superuser_role) {
            return Err(ServiceError::forbidden(format!(
                "Role {} is managed implicitly",
                role.name
            )));
        }
        Ok(())
    }
}
