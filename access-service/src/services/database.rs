//! PostgreSQL storage for access-service.
//!
//! Every mutation runs in one transaction. Row locks order concurrent
//! writers: grant mutations lock the role row, registry mutations lock the
//! module row, and grants take a share lock on the modules they reference.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{FromRow, Postgres, QueryBuilder};
use std::collections::{HashMap, HashSet};

use super::registry::{check_batch_names, plan_availability, plan_grants, requested_modules};
use super::store::{AccessStore, AuditStore, TokenStore, UserStore};
use super::ServiceError;
use crate::models::{
    AuditEvent, AuditFilter, DeletionCause, GrantRequest, Module, ModuleDraft, ModulePermission,
    ModuleWithPermissions, NewAuditEvent, PageRequest, PermissionCode, PermissionKind, Principal,
    ResolvedGrant, Role, User,
};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

#[derive(FromRow)]
struct ModulePermissionRow {
    module_id: i64,
    id: i64,
    code: String,
    name: String,
    description: String,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn attach_permissions(
        conn: &mut PgConnection,
        modules: Vec<Module>,
    ) -> Result<Vec<ModuleWithPermissions>, ServiceError> {
        let ids: Vec<i64> = modules.iter().map(|m| m.id).collect();
        let rows = sqlx::query_as::<_, ModulePermissionRow>(
            r#"
            SELECT mp.module_id, p.id, p.code, p.name, p.description
            FROM module_permissions mp
            JOIN permission_kinds p ON p.id = mp.permission_kind_id
            WHERE mp.module_id = ANY($1) AND mp.deleted_at IS NULL
            ORDER BY p.id
            "#,
        )
        .bind(&ids[..])
        .fetch_all(&mut *conn)
        .await?;

        let mut by_module: HashMap<i64, Vec<PermissionKind>> = HashMap::new();
        for row in rows {
            by_module.entry(row.module_id).or_default().push(PermissionKind {
                id: row.id,
                code: row.code,
                name: row.name,
                description: row.description,
            });
        }

        Ok(modules
            .into_iter()
            .map(|module| {
                let permissions = by_module.remove(&module.id).unwrap_or_default();
                ModuleWithPermissions {
                    module,
                    permissions,
                }
            })
            .collect())
    }

    /// Withdraw kinds from a module's available set and cascade to grants.
    async fn withdraw_permissions(
        conn: &mut PgConnection,
        module_id: i64,
        permission_kind_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let withdrawn = sqlx::query(
            r#"
            UPDATE module_permissions
            SET deleted_at = $3, deletion_cause = $4
            WHERE module_id = $1 AND permission_kind_id = ANY($2) AND deleted_at IS NULL
            "#,
        )
        .bind(module_id)
        .bind(permission_kind_ids)
        .bind(now)
        .bind(DeletionCause::Withdrawn.as_str())
        .execute(&mut *conn)
        .await?
        .rows_affected();

        let grants = sqlx::query(
            r#"
            UPDATE role_module_permissions
            SET deleted_at = $3, deletion_cause = $4
            WHERE module_id = $1 AND permission_kind_id = ANY($2) AND deleted_at IS NULL
            "#,
        )
        .bind(module_id)
        .bind(permission_kind_ids)
        .bind(now)
        .bind(DeletionCause::Withdrawn.as_str())
        .execute(&mut *conn)
        .await?
        .rows_affected();

        tracing::debug!(module_id, withdrawn, grants, "Withdrew module permissions");
        Ok(withdrawn)
    }

    async fn lock_live_module(
        conn: &mut PgConnection,
        module_id: i64,
    ) -> Result<Module, ServiceError> {
        sqlx::query_as::<_, Module>(
            "SELECT * FROM modules WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(module_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("Module {}", module_id)))
    }
}

#[async_trait]
impl AccessStore for Database {
    async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            ServiceError::from(e)
        })?;
        Ok(())
    }

    // ==================== Permission Catalog ====================

    async fn list_permission_kinds(&self) -> Result<Vec<PermissionKind>, ServiceError> {
        Ok(
            sqlx::query_as::<_, PermissionKind>("SELECT * FROM permission_kinds ORDER BY id")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    // ==================== Module Registry ====================

    async fn create_modules(
        &self,
        drafts: &[ModuleDraft],
        now: DateTime<Utc>,
    ) -> Result<Vec<ModuleWithPermissions>, ServiceError> {
        check_batch_names(drafts.iter().map(|d| d.name.as_str()))?;

        let mut tx = self.pool.begin().await?;

        let lowered: Vec<String> = drafts.iter().map(|d| d.name.trim().to_lowercase()).collect();
        let clash: Option<String> = sqlx::query_scalar(
            "SELECT name FROM modules WHERE deleted_at IS NULL AND LOWER(name) = ANY($1) LIMIT 1",
        )
        .bind(&lowered[..])
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(name) = clash {
            return Err(ServiceError::conflict(format!(
                "Module '{}' already exists",
                name
            )));
        }

        let kinds = sqlx::query_as::<_, PermissionKind>("SELECT * FROM permission_kinds ORDER BY id")
            .fetch_all(&mut *tx)
            .await?;

        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let module = sqlx::query_as::<_, Module>(
                r#"
                INSERT INTO modules (name, description, created_at, updated_at)
                VALUES ($1, $2, $3, $3)
                RETURNING *
                "#,
            )
            .bind(draft.name.trim())
            .bind(draft.description.trim())
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO module_permissions (module_id, permission_kind_id)
                SELECT $1, id FROM permission_kinds
                "#,
            )
            .bind(module.id)
            .execute(&mut *tx)
            .await?;

            created.push(ModuleWithPermissions {
                module,
                permissions: kinds.clone(),
            });
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn list_modules(&self) -> Result<Vec<ModuleWithPermissions>, ServiceError> {
        let mut conn = self.pool.acquire().await?;
        let modules = sqlx::query_as::<_, Module>(
            "SELECT * FROM modules WHERE deleted_at IS NULL ORDER BY id",
        )
        .fetch_all(&mut *conn)
        .await?;
        Self::attach_permissions(&mut conn, modules).await
    }

    async fn list_deleted_modules(&self) -> Result<Vec<Module>, ServiceError> {
        Ok(sqlx::query_as::<_, Module>(
            "SELECT * FROM modules WHERE deleted_at IS NOT NULL ORDER BY deleted_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_module(
        &self,
        module_id: i64,
    ) -> Result<Option<ModuleWithPermissions>, ServiceError> {
        let mut conn = self.pool.acquire().await?;
        let module = sqlx::query_as::<_, Module>(
            "SELECT * FROM modules WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(module_id)
        .fetch_optional(&mut *conn)
        .await?;

        match module {
            Some(module) => Ok(Self::attach_permissions(&mut conn, vec![module])
                .await?
                .pop()),
            None => Ok(None),
        }
    }

    async fn replace_module_permissions(
        &self,
        module_id: i64,
        permission_kind_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<ModuleWithPermissions, ServiceError> {
        let mut tx = self.pool.begin().await?;

        let mut module = Self::lock_live_module(&mut tx, module_id).await?;

        let known: HashSet<i64> = sqlx::query_scalar::<_, i64>("SELECT id FROM permission_kinds")
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect();
        let current = sqlx::query_as::<_, ModulePermission>(
            "SELECT * FROM module_permissions WHERE module_id = $1",
        )
        .bind(module_id)
        .fetch_all(&mut *tx)
        .await?;

        let plan = plan_availability(&current, permission_kind_ids, &known)?;

        for kind_id in &plan.insert {
            sqlx::query(
                "INSERT INTO module_permissions (module_id, permission_kind_id) VALUES ($1, $2)",
            )
            .bind(module_id)
            .bind(kind_id)
            .execute(&mut *tx)
            .await?;
        }

        if !plan.reactivate.is_empty() {
            sqlx::query(
                r#"
                UPDATE module_permissions
                SET deleted_at = NULL, deletion_cause = NULL
                WHERE module_id = $1 AND permission_kind_id = ANY($2)
                "#,
            )
            .bind(module_id)
            .bind(&plan.reactivate[..])
            .execute(&mut *tx)
            .await?;
        }

        if !plan.withdraw.is_empty() {
            Self::withdraw_permissions(&mut tx, module_id, &plan.withdraw, now).await?;
        }

        if !plan.is_noop() {
            sqlx::query("UPDATE modules SET updated_at = $2 WHERE id = $1")
                .bind(module_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            module.updated_at = now;
        }

        let updated = Self::attach_permissions(&mut tx, vec![module])
            .await?
            .pop()
            .ok_or_else(|| ServiceError::not_found(format!("Module {}", module_id)))?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn remove_module_permission(
        &self,
        module_id: i64,
        permission_kind_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_live_module(&mut tx, module_id).await?;

        let withdrawn =
            Self::withdraw_permissions(&mut tx, module_id, &[permission_kind_id], now).await?;
        if withdrawn == 0 {
            return Err(ServiceError::not_found(format!(
                "Permission kind {} on module {}",
                permission_kind_id, module_id
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn soft_delete_module(
        &self,
        module_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_live_module(&mut tx, module_id).await?;

        sqlx::query("UPDATE modules SET deleted_at = $2, updated_at = $2 WHERE id = $1")
            .bind(module_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        for table in ["module_permissions", "role_module_permissions"] {
            sqlx::query(&format!(
                "UPDATE {} SET deleted_at = $2, deletion_cause = $3 \
                 WHERE module_id = $1 AND deleted_at IS NULL",
                table
            ))
            .bind(module_id)
            .bind(now)
            .bind(DeletionCause::Module.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(module_id, "Module soft-deleted");
        Ok(())
    }

    async fn restore_module(&self, module_id: i64, now: DateTime<Utc>) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;

        let module = sqlx::query_as::<_, Module>("SELECT * FROM modules WHERE id = $1 FOR UPDATE")
            .bind(module_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Module {}", module_id)))?;

        if !module.is_deleted() {
            return Err(ServiceError::conflict(format!(
                "Module {} is not deleted",
                module_id
            )));
        }

        let name_taken: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM modules
                WHERE deleted_at IS NULL AND LOWER(name) = LOWER($1) AND id <> $2
            )
            "#,
        )
        .bind(&module.name)
        .bind(module_id)
        .fetch_one(&mut *tx)
        .await?;
        if name_taken {
            return Err(ServiceError::conflict(format!(
                "Another module named '{}' is active",
                module.name
            )));
        }

        sqlx::query("UPDATE modules SET deleted_at = NULL, updated_at = $2 WHERE id = $1")
            .bind(module_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        // Rows withdrawn or revoked on their own stay deleted.
        for table in ["module_permissions", "role_module_permissions"] {
            sqlx::query(&format!(
                "UPDATE {} SET deleted_at = NULL, deletion_cause = NULL \
                 WHERE module_id = $1 AND deletion_cause = $2",
                table
            ))
            .bind(module_id)
            .bind(DeletionCause::Module.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(module_id, "Module restored");
        Ok(())
    }

    // ==================== Roles ====================

    async fn create_role(
        &self,
        name: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<Role, ServiceError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM roles WHERE LOWER(name) = LOWER($1))",
        )
        .bind(name.trim())
        .fetch_one(&self.pool)
        .await?;
        if exists {
            return Err(ServiceError::conflict(format!(
                "Role '{}' already exists",
                name.trim()
            )));
        }

        Ok(sqlx::query_as::<_, Role>(
            r#"
            INSERT INTO roles (name, description, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            RETURNING *
            "#,
        )
        .bind(name.trim())
        .bind(description.trim())
        .bind(now)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn list_roles(&self) -> Result<Vec<Role>, ServiceError> {
        Ok(sqlx::query_as::<_, Role>("SELECT * FROM roles ORDER BY id")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_role(&self, role_id: i64) -> Result<Option<Role>, ServiceError> {
        Ok(sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1")
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_role(&self, role_id: i64) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query_scalar::<_, i64>("SELECT id FROM roles WHERE id = $1 FOR UPDATE")
            .bind(role_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Role {}", role_id)))?;

        let holders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role_id = $1")
            .bind(role_id)
            .fetch_one(&mut *tx)
            .await?;
        if holders > 0 {
            return Err(ServiceError::conflict(format!(
                "Role {} is still assigned to {} user(s)",
                role_id, holders
            )));
        }

        sqlx::query("DELETE FROM role_module_permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ==================== Grants ====================

    async fn grant_permissions(
        &self,
        role_id: i64,
        requests: &[GrantRequest],
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query_scalar::<_, i64>("SELECT id FROM roles WHERE id = $1 FOR UPDATE")
            .bind(role_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Role {}", role_id)))?;

        let module_ids = requested_modules(requests);
        let live_modules: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM modules WHERE id = ANY($1) AND deleted_at IS NULL ORDER BY id FOR SHARE",
        )
        .bind(&module_ids[..])
        .fetch_all(&mut *tx)
        .await?;

        let mut available: HashMap<i64, HashSet<i64>> = live_modules
            .into_iter()
            .map(|id| (id, HashSet::new()))
            .collect();
        let pairs: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT module_id, permission_kind_id FROM module_permissions
            WHERE module_id = ANY($1) AND deleted_at IS NULL
            "#,
        )
        .bind(&module_ids[..])
        .fetch_all(&mut *tx)
        .await?;
        for (module_id, kind_id) in pairs {
            if let Some(kinds) = available.get_mut(&module_id) {
                kinds.insert(kind_id);
            }
        }

        let planned = plan_grants(requests, &available)?;

        for (module_id, kind_id) in &planned {
            sqlx::query(
                r#"
                INSERT INTO role_module_permissions (role_id, module_id, permission_kind_id, created_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (role_id, module_id, permission_kind_id)
                DO UPDATE SET deleted_at = NULL, deletion_cause = NULL
                WHERE role_module_permissions.deleted_at IS NOT NULL
                "#,
            )
            .bind(role_id)
            .bind(module_id)
            .bind(kind_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE roles SET updated_at = $2 WHERE id = $1")
            .bind(role_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(role_id, grants = planned.len(), "Granted role permissions");
        Ok(())
    }

    async fn revoke_grants(
        &self,
        role_id: i64,
        module_id: i64,
        permission_kind_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query_scalar::<_, i64>("SELECT id FROM roles WHERE id = $1 FOR UPDATE")
            .bind(role_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Role {}", role_id)))?;

        let revoked = sqlx::query(
            r#"
            UPDATE role_module_permissions
            SET deleted_at = $4, deletion_cause = $5
            WHERE role_id = $1 AND module_id = $2
              AND ($3::BIGINT IS NULL OR permission_kind_id = $3)
              AND deleted_at IS NULL
            "#,
        )
        .bind(role_id)
        .bind(module_id)
        .bind(permission_kind_id)
        .bind(now)
        .bind(DeletionCause::Revoked.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(revoked)
    }

    async fn role_grants(&self, role_id: i64) -> Result<Vec<ResolvedGrant>, ServiceError> {
        Ok(sqlx::query_as::<_, ResolvedGrant>(
            r#"
            SELECT g.id AS grant_id, g.role_id, g.module_id, m.name AS module_name,
                   g.permission_kind_id, p.code AS permission_code, p.name AS permission_name,
                   g.created_at
            FROM role_module_permissions g
            JOIN modules m ON m.id = g.module_id
            JOIN permission_kinds p ON p.id = g.permission_kind_id
            WHERE g.role_id = $1 AND g.deleted_at IS NULL AND m.deleted_at IS NULL
            ORDER BY m.id, p.id
            "#,
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn has_grant(
        &self,
        role_id: i64,
        module_name: &str,
        code: PermissionCode,
    ) -> Result<bool, ServiceError> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM role_module_permissions g
                JOIN modules m ON m.id = g.module_id
                JOIN permission_kinds p ON p.id = g.permission_kind_id
                JOIN module_permissions mp
                  ON mp.module_id = g.module_id AND mp.permission_kind_id = g.permission_kind_id
                WHERE g.role_id = $1
                  AND LOWER(m.name) = LOWER($2)
                  AND p.code = $3
                  AND g.deleted_at IS NULL
                  AND m.deleted_at IS NULL
                  AND mp.deleted_at IS NULL
            )
            "#,
        )
        .bind(role_id)
        .bind(module_name)
        .bind(code.as_str())
        .fetch_one(&self.pool)
        .await?)
    }
}

#[async_trait]
impl UserStore for Database {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        Ok(
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
                .bind(email.trim())
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<User>, ServiceError> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_principal(&self, user_id: i64) -> Result<Option<Principal>, ServiceError> {
        Ok(sqlx::query_as::<_, Principal>(
            r#"
            SELECT u.id AS user_id, u.email, u.role_id, r.name AS role_name
            FROM users u
            JOIN roles r ON r.id = u.role_id
            WHERE u.id = $1 AND u.active
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn set_user_role(
        &self,
        user_id: i64,
        role_id: i64,
        now: DateTime<Utc>,
    ) -> Result<User, ServiceError> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET role_id = $2, updated_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(user_id)
        .bind(role_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("User {}", user_id)))
    }
}

#[async_trait]
impl TokenStore for Database {
    async fn revoke_token(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO token_blacklist (token, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (token) DO NOTHING
            "#,
        )
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn is_token_revoked(&self, token: &str) -> Result<bool, ServiceError> {
        Ok(sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM token_blacklist WHERE token = $1)",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        Ok(sqlx::query("DELETE FROM token_blacklist WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected())
    }
}

// ==================== Audit Trail ====================

/// Append the `WHERE` clause for `filter`, binding every value.
fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &AuditFilter) {
    query.push(" WHERE TRUE");
    if let Some(user_id) = filter.user_id {
        query.push(" AND actor_user_id = ").push_bind(user_id);
    }
    if let Some(email) = &filter.email {
        query
            .push(" AND LOWER(actor_email) = LOWER(")
            .push_bind(email.clone())
            .push(")");
    }
    if let Some(role) = &filter.role {
        query
            .push(" AND LOWER(actor_role) = LOWER(")
            .push_bind(role.clone())
            .push(")");
    }
    if let Some(module) = &filter.module {
        query
            .push(" AND LOWER(module) = LOWER(")
            .push_bind(module.clone())
            .push(")");
    }
    if let Some(action) = filter.action {
        query.push(" AND action = ").push_bind(action.as_str());
    }
    if let Some(from) = filter.from {
        query.push(" AND occurred_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        query.push(" AND occurred_at <= ").push_bind(to);
    }
}

fn count_query(filter: &AuditFilter) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new("SELECT COUNT(*) FROM audit_logs");
    push_filter(&mut query, filter);
    query
}

fn page_query(filter: &AuditFilter, page: PageRequest) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new("SELECT * FROM audit_logs");
    push_filter(&mut query, filter);
    query
        .push(" ORDER BY occurred_at DESC, id DESC LIMIT ")
        .push_bind(page.size)
        .push(" OFFSET ")
        .push_bind(page.offset());
    query
}

#[async_trait]
impl AuditStore for Database {
    async fn insert_audit_event(&self, event: &NewAuditEvent) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (actor_user_id, actor_email, actor_role, module, action,
                                    permission_used, entity_type, entity_id, before_state,
                                    after_state, ip, user_agent, status_code, path, method,
                                    occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(event.actor_user_id)
        .bind(&event.actor_email)
        .bind(&event.actor_role)
        .bind(&event.module)
        .bind(event.action.as_str())
        .bind(&event.permission_used)
        .bind(&event.entity_type)
        .bind(&event.entity_id)
        .bind(&event.before_state)
        .bind(&event.after_state)
        .bind(&event.ip)
        .bind(&event.user_agent)
        .bind(event.status_code)
        .bind(&event.path)
        .bind(&event.method)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_audit_events(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<(Vec<AuditEvent>, i64), ServiceError> {
        let mut count = count_query(filter);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut select = page_query(filter, page);
        let events = select
            .build_query_as::<AuditEvent>()
            .fetch_all(&self.pool)
            .await?;

        Ok((events, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::services::{
        AccessControlService, Authorizer, JwtService, SessionAuthority, SystemClock, TokenError,
    };
    use secrecy::Secret;
    use std::sync::Arc;
    use uuid::Uuid;

    #[test]
    fn audit_filter_binds_parameters_in_order() {
        let filter = AuditFilter {
            user_id: Some(4),
            module: Some("Reports".to_string()),
            to: Some(Utc::now()),
            ..Default::default()
        };
        let query = count_query(&filter);
        assert_eq!(
            query.sql(),
            "SELECT COUNT(*) FROM audit_logs WHERE TRUE AND actor_user_id = $1 \
             AND LOWER(module) = LOWER($2) AND occurred_at <= $3"
        );
    }

    #[test]
    fn page_query_appends_ordering_and_limits() {
        let query = page_query(&AuditFilter::default(), PageRequest::clamped(Some(2), Some(5)));
        assert_eq!(
            query.sql(),
            "SELECT * FROM audit_logs WHERE TRUE ORDER BY occurred_at DESC, id DESC \
             LIMIT $1 OFFSET $2"
        );
    }

    // The tests below need PostgreSQL at TEST_DATABASE_URL. Names carry a
    // random suffix so runs against the same database do not collide.

    struct Fixture {
        db: Arc<Database>,
        access: AccessControlService,
        kinds: HashMap<String, i64>,
    }

    impl Fixture {
        async fn connect() -> Self {
            let url = std::env::var("TEST_DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/access_test".to_string());
            let pool = PgPool::connect(&url).await.unwrap();
            crate::db::run_migrations(&pool).await.unwrap();

            let db = Arc::new(Database::new(pool));
            let access =
                AccessControlService::new(db.clone(), db.clone(), Arc::new(SystemClock), "SUPERADMIN");
            let kinds = access
                .list_permission_kinds()
                .await
                .unwrap()
                .into_iter()
                .map(|k| (k.code, k.id))
                .collect();
            Self { db, access, kinds }
        }

        fn kind(&self, code: &str) -> i64 {
            self.kinds[code]
        }

        fn kinds(&self, codes: &[&str]) -> Vec<i64> {
            codes.iter().map(|c| self.kind(c)).collect()
        }

        async fn module(&self, name: &str, codes: &[&str]) -> ModuleWithPermissions {
            let draft = ModuleDraft {
                name: unique(name),
                description: String::new(),
            };
            let created = self.access.create_modules(&[draft]).await.unwrap();
            self.access
                .set_module_available_permissions(created[0].module.id, &self.kinds(codes))
                .await
                .unwrap()
        }

        async fn role(&self, name: &str) -> Role {
            self.access.create_role(&unique(name), "").await.unwrap()
        }

        async fn grant(&self, role_id: i64, module_id: i64, codes: &[&str]) {
            self.access
                .grant_role_permissions(role_id, &[request(module_id, self.kinds(codes))])
                .await
                .unwrap();
        }

        async fn granted_codes(&self, role_id: i64, module_id: i64) -> Vec<String> {
            let mut codes: Vec<String> = self
                .access
                .get_role_grants(role_id)
                .await
                .unwrap()
                .into_iter()
                .filter(|g| g.module_id == module_id)
                .map(|g| g.permission_code)
                .collect();
            codes.sort();
            codes
        }
    }

    fn unique(name: &str) -> String {
        format!("{}-{}", name, &Uuid::new_v4().simple().to_string()[..8])
    }

    fn request(module_id: i64, permission_kind_ids: Vec<i64>) -> GrantRequest {
        GrantRequest {
            module_id,
            permission_kind_ids,
        }
    }

    fn codes(module: &ModuleWithPermissions) -> Vec<String> {
        let mut codes: Vec<String> = module.permissions.iter().map(|p| p.code.clone()).collect();
        codes.sort();
        codes
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn test_health_check() {
        let fx = Fixture::connect().await;
        assert!(AccessStore::health_check(fx.db.as_ref()).await.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn missing_export_grant_is_denied() {
        let fx = Fixture::connect().await;
        let reports = fx.module("Reports", &["R", "X"]).await;
        let role = fx.role("Funcionario").await;
        fx.grant(role.id, reports.module.id, &["R"]).await;

        let name = reports.module.name.to_lowercase();
        assert!(fx.db.has_grant(role.id, &name, PermissionCode::Read).await.unwrap());
        assert!(!fx.db.has_grant(role.id, &name, PermissionCode::Export).await.unwrap());

        let authorizer = Authorizer::new(fx.db.clone(), "SUPERADMIN");
        let principal = Principal {
            user_id: 1,
            email: "ana@acme.test".to_string(),
            role_id: role.id,
            role_name: role.name.clone(),
        };
        assert!(
            !authorizer
                .is_allowed(&principal, &reports.module.name, PermissionCode::Export)
                .await
        );
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn invalid_grant_writes_nothing() {
        let fx = Fixture::connect().await;
        let reports = fx.module("Reports", &["R", "W"]).await;
        let billing = fx.module("Billing", &["R"]).await;
        let role = fx.role("Analyst").await;

        let err = fx
            .access
            .grant_role_permissions(
                role.id,
                &[
                    request(reports.module.id, fx.kinds(&["R", "W"])),
                    request(billing.module.id, fx.kinds(&["X"])),
                ],
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::InvalidGrant { module_id, .. } if module_id == billing.module.id
        ));
        assert!(fx.access.get_role_grants(role.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn regrant_keeps_a_single_row() {
        let fx = Fixture::connect().await;
        let reports = fx.module("Reports", &["R"]).await;
        let role = fx.role("Analyst").await;

        fx.grant(role.id, reports.module.id, &["R"]).await;
        let first = fx.access.get_role_grants(role.id).await.unwrap();
        fx.grant(role.id, reports.module.id, &["R"]).await;
        let second = fx.access.get_role_grants(role.id).await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].grant_id, second[0].grant_id);
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn restore_is_the_inverse_of_delete() {
        let fx = Fixture::connect().await;
        let reports = fx.module("Reports", &["R", "W", "X"]).await;
        let module_id = reports.module.id;
        let role = fx.role("Analyst").await;
        fx.grant(role.id, module_id, &["R", "X"]).await;
        fx.access
            .revoke_grant(role.id, module_id, fx.kind("X"))
            .await
            .unwrap();

        fx.access.soft_delete_module(module_id).await.unwrap();
        assert!(fx.db.find_module(module_id).await.unwrap().is_none());
        assert!(fx.granted_codes(role.id, module_id).await.is_empty());
        assert!(!fx
            .db
            .has_grant(role.id, &reports.module.name, PermissionCode::Read)
            .await
            .unwrap());

        let restored = fx.access.restore_module(module_id).await.unwrap();
        assert_eq!(codes(&restored), vec!["R", "W", "X"]);
        assert_eq!(fx.granted_codes(role.id, module_id).await, vec!["R"]);
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn withdrawn_permissions_take_their_grants_along() {
        let fx = Fixture::connect().await;
        let reports = fx.module("Reports", &["R", "X"]).await;
        let module_id = reports.module.id;
        let role = fx.role("Analyst").await;
        fx.grant(role.id, module_id, &["R", "X"]).await;

        fx.access
            .set_module_available_permissions(module_id, &fx.kinds(&["R"]))
            .await
            .unwrap();
        assert_eq!(fx.granted_codes(role.id, module_id).await, vec!["R"]);

        let reoffered = fx
            .access
            .set_module_available_permissions(module_id, &fx.kinds(&["R", "X"]))
            .await
            .unwrap();
        assert_eq!(codes(&reoffered), vec!["R", "X"]);
        assert_eq!(fx.granted_codes(role.id, module_id).await, vec!["R"]);

        // A deleted and restored module must not bring the withdrawn grant back.
        fx.access.soft_delete_module(module_id).await.unwrap();
        fx.access.restore_module(module_id).await.unwrap();
        assert_eq!(fx.granted_codes(role.id, module_id).await, vec!["R"]);
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn logged_out_token_is_revoked() {
        let fx = Fixture::connect().await;
        let jwt = JwtService::new(&JwtConfig {
            secret: Secret::new("postgres-test-secret-0123456789abcdef".to_string()),
            expiry_hours: 24,
        })
        .unwrap();
        let sessions = SessionAuthority::new(jwt, fx.db.clone(), Arc::new(SystemClock));

        let (token, _) = sessions.issue(1, "ana@acme.test", "Funcionario").unwrap();
        assert!(sessions.validate(&token).await.is_ok());

        sessions.revoke(&token).await.unwrap();
        sessions.revoke(&token).await.unwrap();
        let err = sessions.validate(&token).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthenticated(TokenError::Revoked)));

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM token_blacklist WHERE token = $1")
            .bind(&token)
            .fetch_one(fx.db.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore] // Requires running PostgreSQL
    async fn concurrent_grants_on_one_role_do_not_interleave() {
        let fx = Fixture::connect().await;
        let reports = fx.module("Reports", &["R", "W"]).await;
        let billing = fx.module("Billing", &["R"]).await;
        let role_id = fx.role("Analyst").await.id;

        for _ in 0..10 {
            let valid = {
                let access = fx.access.clone();
                let batch = vec![request(reports.module.id, fx.kinds(&["R", "W"]))];
                tokio::spawn(async move { access.grant_role_permissions(role_id, &batch).await })
            };
            let invalid = {
                let access = fx.access.clone();
                let batch = vec![
                    request(billing.module.id, fx.kinds(&["R"])),
                    request(reports.module.id, fx.kinds(&["D"])),
                ];
                tokio::spawn(async move { access.grant_role_permissions(role_id, &batch).await })
            };

            assert!(valid.await.unwrap().is_ok());
            assert!(matches!(
                invalid.await.unwrap(),
                Err(ServiceError::InvalidGrant { .. })
            ));
        }

        let grants = fx.access.get_role_grants(role_id).await.unwrap();
        assert_eq!(grants.len(), 2);
        assert!(grants.iter().all(|g| g.module_id == reports.module.id));
    }
}
