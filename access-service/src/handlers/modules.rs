use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        access::{CreateModulesRequest, SetModulePermissionsRequest},
        MessageResponse,
    },
    middleware::AuditScope,
    models::{Module, ModuleWithPermissions},
    utils::ValidatedJson,
    AppState,
};

/// POST /modules
#[tracing::instrument(skip_all)]
pub async fn create_modules(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateModulesRequest>,
) -> Result<(StatusCode, Json<Vec<ModuleWithPermissions>>), AppError> {
    let created = state.access.create_modules(&req.drafts()).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /modules
pub async fn list_modules(
    State(state): State<AppState>,
) -> Result<Json<Vec<ModuleWithPermissions>>, AppError> {
    Ok(Json(state.access.list_modules().await?))
}

/// GET /modules/deleted
pub async fn list_deleted_modules(
    State(state): State<AppState>,
) -> Result<Json<Vec<Module>>, AppError> {
    Ok(Json(state.access.list_deleted_modules().await?))
}

/// GET /modules/:id
pub async fn get_module(
    State(state): State<AppState>,
    scope: AuditScope,
    Path(module_id): Path<i64>,
) -> Result<Json<ModuleWithPermissions>, AppError> {
    scope.entity("module", module_id);
    Ok(Json(state.access.get_module(module_id).await?))
}

/// Soft-delete a module together with its available permissions and grants.
///
/// DELETE /modules/:id
#[tracing::instrument(skip(state, scope))]
pub async fn delete_module(
    State(state): State<AppState>,
    scope: AuditScope,
    Path(module_id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    scope.entity("module", module_id);
    let before = state.access.get_module(module_id).await?;
    scope.before(&before);

    state.access.soft_delete_module(module_id).await?;
    Ok(Json(MessageResponse::new(format!(
        "Module '{}' deleted",
        before.module.name
    ))))
}

/// POST /modules/:id/restore
#[tracing::instrument(skip(state, scope))]
pub async fn restore_module(
    State(state): State<AppState>,
    scope: AuditScope,
    Path(module_id): Path<i64>,
) -> Result<Json<ModuleWithPermissions>, AppError> {
    scope.entity("module", module_id);
    Ok(Json(state.access.restore_module(module_id).await?))
}

/// Replace the set of permission kinds a module offers.
///
/// PUT /modules/:id/permissions
#[tracing::instrument(skip(state, scope, req))]
pub async fn set_module_permissions(
    State(state): State<AppState>,
    scope: AuditScope,
    Path(module_id): Path<i64>,
    Json(req): Json<SetModulePermissionsRequest>,
) -> Result<Json<ModuleWithPermissions>, AppError> {
    scope.entity("module", module_id);
    let before = state.access.get_module(module_id).await?;
    scope.before(&before);

    let updated = state
        .access
        .set_module_available_permissions(module_id, &req.permission_kind_ids)
        .await?;
    Ok(Json(updated))
}

/// DELETE /modules/:id/permissions/:kind_id
#[tracing::instrument(skip(state, scope))]
pub async fn remove_module_permission(
    State(state): State<AppState>,
    scope: AuditScope,
    Path((module_id, kind_id)): Path<(i64, i64)>,
) -> Result<Json<MessageResponse>, AppError> {
    scope.entity("module", module_id);
    let before = state.access.get_module(module_id).await?;
    scope.before(&before);

    state
        .access
        .remove_module_permission(module_id, kind_id)
        .await?;
    Ok(Json(MessageResponse::new("Permission removed from module")))
}
