//! In-process storage with the same transactional semantics as [`Database`].
//!
//! Every operation holds one lock for its whole duration and validates before
//! it mutates, so a failed call leaves no partial writes behind. Used by the
//! test suite and for running the service without PostgreSQL.
//!
//! [`Database`]: super::Database

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::registry::{check_batch_names, plan_availability, plan_grants};
use super::store::{AccessStore, AuditStore, TokenStore, UserStore};
use super::ServiceError;
use crate::models::{
    AuditEvent, AuditFilter, DeletionCause, Grant, GrantRequest, Module, ModuleDraft,
    ModulePermission, ModuleWithPermissions, NewAuditEvent, PageRequest, PermissionCode,
    PermissionKind, Principal, ResolvedGrant, Role, TokenRecord, User,
};

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    permission_kinds: Vec<PermissionKind>,
    modules: Vec<Module>,
    module_permissions: Vec<ModulePermission>,
    roles: Vec<Role>,
    grants: Vec<Grant>,
    users: Vec<User>,
    revoked_tokens: HashMap<String, TokenRecord>,
    audit_events: Vec<AuditEvent>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn live_module(&self, module_id: i64) -> Option<&Module> {
        self.modules
            .iter()
            .find(|m| m.id == module_id && !m.is_deleted())
    }

    fn require_live_module(&self, module_id: i64) -> Result<&Module, ServiceError> {
        self.live_module(module_id)
            .ok_or_else(|| ServiceError::not_found(format!("Module {}", module_id)))
    }

    fn require_role(&self, role_id: i64) -> Result<&Role, ServiceError> {
        self.roles
            .iter()
            .find(|r| r.id == role_id)
            .ok_or_else(|| ServiceError::not_found(format!("Role {}", role_id)))
    }

    fn live_name_taken(&self, name: &str, except: Option<i64>) -> bool {
        self.modules.iter().any(|m| {
            !m.is_deleted() && Some(m.id) != except && m.name.eq_ignore_ascii_case(name.trim())
        })
    }

    fn available_kinds(&self, module_id: i64) -> HashSet<i64> {
        self.module_permissions
            .iter()
            .filter(|mp| mp.module_id == module_id && mp.is_active())
            .map(|mp| mp.permission_kind_id)
            .collect()
    }

    fn with_permissions(&self, module: &Module) -> ModuleWithPermissions {
        let available = self.available_kinds(module.id);
        let permissions = self
            .permission_kinds
            .iter()
            .filter(|k| available.contains(&k.id))
            .cloned()
            .collect();
        ModuleWithPermissions {
            module: module.clone(),
            permissions,
        }
    }

    fn withdraw(&mut self, module_id: i64, kind_ids: &[i64], now: DateTime<Utc>) -> u64 {
        let cause = Some(DeletionCause::Withdrawn.as_str().to_string());
        let mut withdrawn = 0;
        for mp in self.module_permissions.iter_mut().filter(|mp| {
            mp.module_id == module_id && mp.is_active() && kind_ids.contains(&mp.permission_kind_id)
        }) {
            mp.deleted_at = Some(now);
            mp.deletion_cause = cause.clone();
            withdrawn += 1;
        }
        for grant in self.grants.iter_mut().filter(|g| {
            g.module_id == module_id && g.is_active() && kind_ids.contains(&g.permission_kind_id)
        }) {
            grant.deleted_at = Some(now);
            grant.deletion_cause = cause.clone();
        }
        withdrawn
    }
}

/// Storage kept entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    offline: AtomicBool,
    failing_audit_writes: AtomicU32,
    audit_write_attempts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the four permission kinds.
    pub fn with_catalog() -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.state.lock() {
            for (code, name) in [
                (PermissionCode::Read, "Read"),
                (PermissionCode::Write, "Write"),
                (PermissionCode::Export, "Export"),
                (PermissionCode::Delete, "Delete"),
            ] {
                let id = state.next_id();
                state.permission_kinds.push(PermissionKind {
                    id,
                    code: code.as_str().to_string(),
                    name: name.to_string(),
                    description: String::new(),
                });
            }
        }
        store
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, ServiceError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ServiceError::unavailable("memory store is offline"));
        }
        self.state
            .lock()
            .map_err(|_| ServiceError::unavailable("memory store lock poisoned"))
    }

    /// Make every subsequent call fail with `Unavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Audit inserts attempted so far, including failed ones.
    pub fn audit_write_attempts(&self) -> usize {
        self.audit_write_attempts.load(Ordering::SeqCst)
    }

    /// Fail the next `count` audit inserts with `Unavailable`.
    pub fn fail_audit_writes(&self, count: u32) {
        self.failing_audit_writes.store(count, Ordering::SeqCst);
    }

    pub fn insert_user(
        &self,
        full_name: &str,
        email: &str,
        role_id: i64,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<User, ServiceError> {
        let mut state = self.lock()?;
        state.require_role(role_id)?;
        if state
            .users
            .iter()
            .any(|u| u.email.eq_ignore_ascii_case(email.trim()))
        {
            return Err(ServiceError::conflict(format!("User '{}' already exists", email)));
        }
        let user = User {
            id: state.next_id(),
            full_name: full_name.to_string(),
            email: email.trim().to_string(),
            role_id,
            password_hash: password_hash.to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        };
        state.users.push(user.clone());
        Ok(user)
    }

    pub fn permission_kind_id(&self, code: PermissionCode) -> Option<i64> {
        let state = self.lock().ok()?;
        state
            .permission_kinds
            .iter()
            .find(|k| k.code == code.as_str())
            .map(|k| k.id)
    }

    /// Every grant row, live or soft-deleted.
    pub fn grant_rows(&self) -> Vec<Grant> {
        self.lock().map(|s| s.grants.clone()).unwrap_or_default()
    }

    /// Every registry row, live or soft-deleted.
    pub fn module_permission_rows(&self) -> Vec<ModulePermission> {
        self.lock()
            .map(|s| s.module_permissions.clone())
            .unwrap_or_default()
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.lock()
            .map(|s| s.audit_events.clone())
            .unwrap_or_default()
    }

    pub fn revoked_token_count(&self) -> usize {
        self.lock().map(|s| s.revoked_tokens.len()).unwrap_or(0)
    }
}

#[async_trait]
impl AccessStore for MemoryStore {
    async fn health_check(&self) -> Result<(), ServiceError> {
        self.lock().map(|_| ())
    }

    async fn list_permission_kinds(&self) -> Result<Vec<PermissionKind>, ServiceError> {
        Ok(self.lock()?.permission_kinds.clone())
    }

    async fn create_modules(
        &self,
        drafts: &[ModuleDraft],
        now: DateTime<Utc>,
    ) -> Result<Vec<ModuleWithPermissions>, ServiceError> {
        check_batch_names(drafts.iter().map(|d| d.name.as_str()))?;

        let mut state = self.lock()?;
        if let Some(draft) = drafts.iter().find(|d| state.live_name_taken(&d.name, None)) {
            return Err(ServiceError::conflict(format!(
                "Module '{}' already exists",
                draft.name.trim()
            )));
        }

        let kind_ids: Vec<i64> = state.permission_kinds.iter().map(|k| k.id).collect();
        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let module = Module {
                id: state.next_id(),
                name: draft.name.trim().to_string(),
                description: draft.description.trim().to_string(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            };
            for kind_id in &kind_ids {
                let id = state.next_id();
                state.module_permissions.push(ModulePermission {
                    id,
                    module_id: module.id,
                    permission_kind_id: *kind_id,
                    deleted_at: None,
                    deletion_cause: None,
                });
            }
            state.modules.push(module.clone());
            created.push(state.with_permissions(&module));
        }
        Ok(created)
    }

    async fn list_modules(&self) -> Result<Vec<ModuleWithPermissions>, ServiceError> {
        let state = self.lock()?;
        Ok(state
            .modules
            .iter()
            .filter(|m| !m.is_deleted())
            .map(|m| state.with_permissions(m))
            .collect())
    }

    async fn list_deleted_modules(&self) -> Result<Vec<Module>, ServiceError> {
        let state = self.lock()?;
        let mut deleted: Vec<Module> = state
            .modules
            .iter()
            .filter(|m| m.is_deleted())
            .cloned()
            .collect();
        deleted.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at).then(b.id.cmp(&a.id)));
        Ok(deleted)
    }

    async fn find_module(
        &self,
        module_id: i64,
    ) -> Result<Option<ModuleWithPermissions>, ServiceError> {
        let state = self.lock()?;
        Ok(state.live_module(module_id).map(|m| state.with_permissions(m)))
    }

    async fn replace_module_permissions(
        &self,
        module_id: i64,
        permission_kind_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<ModuleWithPermissions, ServiceError> {
        let mut state = self.lock()?;
        state.require_live_module(module_id)?;

        let known: HashSet<i64> = state.permission_kinds.iter().map(|k| k.id).collect();
        let current: Vec<ModulePermission> = state
            .module_permissions
            .iter()
            .filter(|mp| mp.module_id == module_id)
            .cloned()
            .collect();
        let plan = plan_availability(&current, permission_kind_ids, &known)?;

        for kind_id in &plan.insert {
            let id = state.next_id();
            state.module_permissions.push(ModulePermission {
                id,
                module_id,
                permission_kind_id: *kind_id,
                deleted_at: None,
                deletion_cause: None,
            });
        }
        for mp in state.module_permissions.iter_mut().filter(|mp| {
            mp.module_id == module_id && plan.reactivate.contains(&mp.permission_kind_id)
        }) {
            mp.deleted_at = None;
            mp.deletion_cause = None;
        }
        if !plan.withdraw.is_empty() {
            state.withdraw(module_id, &plan.withdraw, now);
        }
        if !plan.is_noop() {
            if let Some(module) = state.modules.iter_mut().find(|m| m.id == module_id) {
                module.updated_at = now;
            }
        }

        let module = state.require_live_module(module_id)?.clone();
        Ok(state.with_permissions(&module))
    }

    async fn remove_module_permission(
        &self,
        module_id: i64,
        permission_kind_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        state.require_live_module(module_id)?;
        if state.withdraw(module_id, &[permission_kind_id], now) == 0 {
            return Err(ServiceError::not_found(format!(
                "Permission kind {} on module {}",
                permission_kind_id, module_id
            )));
        }
        Ok(())
    }

    async fn soft_delete_module(
        &self,
        module_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        state.require_live_module(module_id)?;

        let cause = Some(DeletionCause::Module.as_str().to_string());
        if let Some(module) = state.modules.iter_mut().find(|m| m.id == module_id) {
            module.deleted_at = Some(now);
            module.updated_at = now;
        }
        for mp in state
            .module_permissions
            .iter_mut()
            .filter(|mp| mp.module_id == module_id && mp.is_active())
        {
            mp.deleted_at = Some(now);
            mp.deletion_cause = cause.clone();
        }
        for grant in state
            .grants
            .iter_mut()
            .filter(|g| g.module_id == module_id && g.is_active())
        {
            grant.deleted_at = Some(now);
            grant.deletion_cause = cause.clone();
        }
        Ok(())
    }

    async fn restore_module(&self, module_id: i64, now: DateTime<Utc>) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        let module = state
            .modules
            .iter()
            .find(|m| m.id == module_id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(format!("Module {}", module_id)))?;

        if !module.is_deleted() {
            return Err(ServiceError::conflict(format!(
                "Module {} is not deleted",
                module_id
            )));
        }
        if state.live_name_taken(&module.name, Some(module_id)) {
            return Err(ServiceError::conflict(format!(
                "Another module named '{}' is active",
                module.name
            )));
        }

        let cause = DeletionCause::Module.as_str();
        if let Some(module) = state.modules.iter_mut().find(|m| m.id == module_id) {
            module.deleted_at = None;
            module.updated_at = now;
        }
        for mp in state
            .module_permissions
            .iter_mut()
            .filter(|mp| mp.module_id == module_id && mp.deletion_cause.as_deref() == Some(cause))
        {
            mp.deleted_at = None;
            mp.deletion_cause = None;
        }
        for grant in state
            .grants
            .iter_mut()
            .filter(|g| g.module_id == module_id && g.deletion_cause.as_deref() == Some(cause))
        {
            grant.deleted_at = None;
            grant.deletion_cause = None;
        }
        Ok(())
    }

    async fn create_role(
        &self,
        name: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<Role, ServiceError> {
        let mut state = self.lock()?;
        if state
            .roles
            .iter()
            .any(|r| r.name.eq_ignore_ascii_case(name.trim()))
        {
            return Err(ServiceError::conflict(format!(
                "Role '{}' already exists",
                name.trim()
            )));
        }
        let role = Role {
            id: state.next_id(),
            name: name.trim().to_string(),
            description: description.trim().to_string(),
            created_at: now,
            updated_at: now,
        };
        state.roles.push(role.clone());
        Ok(role)
    }

    async fn list_roles(&self) -> Result<Vec<Role>, ServiceError> {
        Ok(self.lock()?.roles.clone())
    }

    async fn find_role(&self, role_id: i64) -> Result<Option<Role>, ServiceError> {
        Ok(self.lock()?.roles.iter().find(|r| r.id == role_id).cloned())
    }

    async fn delete_role(&self, role_id: i64) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        state.require_role(role_id)?;
        let holders = state.users.iter().filter(|u| u.role_id == role_id).count();
        if holders > 0 {
            return Err(ServiceError::conflict(format!(
                "Role {} is still assigned to {} user(s)",
                role_id, holders
            )));
        }
        state.grants.retain(|g| g.role_id != role_id);
        state.roles.retain(|r| r.id != role_id);
        Ok(())
    }

    async fn grant_permissions(
        &self,
        role_id: i64,
        requests: &[GrantRequest],
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        state.require_role(role_id)?;

        let available: HashMap<i64, HashSet<i64>> = requests
            .iter()
            .filter_map(|r| state.live_module(r.module_id))
            .map(|m| (m.id, state.available_kinds(m.id)))
            .collect();
        let planned = plan_grants(requests, &available)?;

        for (module_id, kind_id) in planned {
            let existing = state.grants.iter_mut().find(|g| {
                g.role_id == role_id && g.module_id == module_id && g.permission_kind_id == kind_id
            });
            match existing {
                Some(grant) => {
                    grant.deleted_at = None;
                    grant.deletion_cause = None;
                }
                None => {
                    let id = state.next_id();
                    state.grants.push(Grant {
                        id,
                        role_id,
                        module_id,
                        permission_kind_id: kind_id,
                        created_at: now,
                        deleted_at: None,
                        deletion_cause: None,
                    });
                }
            }
        }
        if let Some(role) = state.roles.iter_mut().find(|r| r.id == role_id) {
            role.updated_at = now;
        }
        Ok(())
    }

    async fn revoke_grants(
        &self,
        role_id: i64,
        module_id: i64,
        permission_kind_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut state = self.lock()?;
        state.require_role(role_id)?;

        let mut revoked = 0;
        for grant in state.grants.iter_mut().filter(|g| {
            g.role_id == role_id
                && g.module_id == module_id
                && g.is_active()
                && permission_kind_id.map_or(true, |k| g.permission_kind_id == k)
        }) {
            grant.deleted_at = Some(now);
            grant.deletion_cause = Some(DeletionCause::Revoked.as_str().to_string());
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn role_grants(&self, role_id: i64) -> Result<Vec<ResolvedGrant>, ServiceError> {
        let state = self.lock()?;
        let mut resolved: Vec<ResolvedGrant> = state
            .grants
            .iter()
            .filter(|g| g.role_id == role_id && g.is_active())
            .filter_map(|g| {
                let module = state.live_module(g.module_id)?;
                let kind = state
                    .permission_kinds
                    .iter()
                    .find(|k| k.id == g.permission_kind_id)?;
                Some(ResolvedGrant {
                    grant_id: g.id,
                    role_id: g.role_id,
                    module_id: module.id,
                    module_name: module.name.clone(),
                    permission_kind_id: kind.id,
                    permission_code: kind.code.clone(),
                    permission_name: kind.name.clone(),
                    created_at: g.created_at,
                })
            })
            .collect();
        resolved.sort_by_key(|g| (g.module_id, g.permission_kind_id));
        Ok(resolved)
    }

    async fn has_grant(
        &self,
        role_id: i64,
        module_name: &str,
        code: PermissionCode,
    ) -> Result<bool, ServiceError> {
        let state = self.lock()?;
        let Some(kind) = state
            .permission_kinds
            .iter()
            .find(|k| k.code == code.as_str())
        else {
            return Ok(false);
        };
        let Some(module) = state
            .modules
            .iter()
            .find(|m| !m.is_deleted() && m.name.eq_ignore_ascii_case(module_name))
        else {
            return Ok(false);
        };

        let available = state.available_kinds(module.id).contains(&kind.id);
        let granted = state.grants.iter().any(|g| {
            g.role_id == role_id
                && g.module_id == module.id
                && g.permission_kind_id == kind.id
                && g.is_active()
        });
        Ok(available && granted)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        Ok(self
            .lock()?
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email.trim()))
            .cloned())
    }

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<User>, ServiceError> {
        Ok(self.lock()?.users.iter().find(|u| u.id == user_id).cloned())
    }

    async fn find_principal(&self, user_id: i64) -> Result<Option<Principal>, ServiceError> {
        let state = self.lock()?;
        let Some(user) = state.users.iter().find(|u| u.id == user_id && u.active) else {
            return Ok(None);
        };
        Ok(state
            .roles
            .iter()
            .find(|r| r.id == user.role_id)
            .map(|role| Principal {
                user_id: user.id,
                email: user.email.clone(),
                role_id: role.id,
                role_name: role.name.clone(),
            }))
    }

    async fn set_user_role(
        &self,
        user_id: i64,
        role_id: i64,
        now: DateTime<Utc>,
    ) -> Result<User, ServiceError> {
        let mut state = self.lock()?;
        state.require_role(role_id)?;
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| ServiceError::not_found(format!("User {}", user_id)))?;
        user.role_id = role_id;
        user.updated_at = now;
        Ok(user.clone())
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn revoke_token(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let mut state = self.lock()?;
        if state.revoked_tokens.contains_key(token) {
            return Ok(false);
        }
        let id = state.next_id();
        state.revoked_tokens.insert(
            token.to_string(),
            TokenRecord {
                id,
                token: token.to_string(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn is_token_revoked(&self, token: &str) -> Result<bool, ServiceError> {
        Ok(self.lock()?.revoked_tokens.contains_key(token))
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let mut state = self.lock()?;
        let before = state.revoked_tokens.len();
        state.revoked_tokens.retain(|_, record| record.expires_at >= now);
        Ok((before - state.revoked_tokens.len()) as u64)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert_audit_event(&self, event: &NewAuditEvent) -> Result<(), ServiceError> {
        self.audit_write_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(field) = event.oversized_field() {
            return Err(ServiceError::Rejected(format!(
                "value too long for audit_logs.{} (22001)",
                field
            )));
        }

        let injected = self
            .failing_audit_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ServiceError::unavailable("injected audit write failure"));
        }

        let mut state = self.lock()?;
        let id = state.next_id();
        state.audit_events.push(event.clone().into_event(id));
        Ok(())
    }

    async fn find_audit_events(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<(Vec<AuditEvent>, i64), ServiceError> {
        let state = self.lock()?;
        let mut matching: Vec<&AuditEvent> = state
            .audit_events
            .iter()
            .filter(|e| filter.matches(e))
            .collect();
        matching.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .cloned()
            .collect();
        Ok((items, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (MemoryStore, ModuleWithPermissions, Role) {
        let store = MemoryStore::with_catalog();
        let now = Utc::now();
        let module = store
            .create_modules(
                &[ModuleDraft {
                    name: "Reports".to_string(),
                    description: String::new(),
                }],
                now,
            )
            .await
            .unwrap()
            .remove(0);
        let role = store.create_role("Analyst", "", now).await.unwrap();
        (store, module, role)
    }

    #[tokio::test]
    async fn new_modules_offer_every_permission_kind() {
        let (_, module, _) = seeded().await;
        let codes: Vec<&str> = module.permissions.iter().map(|p| p.code.as_str()).collect();
        assert_eq!(codes, vec!["R", "W", "X", "D"]);
    }

    #[tokio::test]
    async fn duplicate_live_module_name_conflicts() {
        let (store, _, _) = seeded().await;
        let err = store
            .create_modules(
                &[ModuleDraft {
                    name: "reports".to_string(),
                    description: String::new(),
                }],
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn has_grant_ignores_module_name_case() {
        let (store, module, role) = seeded().await;
        let read = store.permission_kind_id(PermissionCode::Read).unwrap();
        store
            .grant_permissions(
                role.id,
                &[GrantRequest {
                    module_id: module.module.id,
                    permission_kind_ids: vec![read],
                }],
                Utc::now(),
            )
            .await
            .unwrap();

        assert!(store
            .has_grant(role.id, "REPORTS", PermissionCode::Read)
            .await
            .unwrap());
        assert!(!store
            .has_grant(role.id, "reports", PermissionCode::Write)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let (store, _, role) = seeded().await;
        store.set_offline(true);
        let err = store
            .has_grant(role.id, "Reports", PermissionCode::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable(_)));
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_tokens() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .revoke_token("old", now - chrono::Duration::hours(1))
            .await
            .unwrap();
        store
            .revoke_token("fresh", now + chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(store.delete_expired_tokens(now).await.unwrap(), 1);
        assert!(store.is_token_revoked("fresh").await.unwrap());
        assert!(!store.is_token_revoked("old").await.unwrap());
    }
}
