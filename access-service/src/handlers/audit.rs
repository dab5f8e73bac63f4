use axum::{
    extract::{Path, Query, State},
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::audit::{AuditFilterQuery, DateRangeQuery, PageQuery},
    models::{AuditEvent, Paginated},
    AppState,
};

type Page = Json<Paginated<AuditEvent>>;

/// GET /audit/logs
pub async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Page, AppError> {
    Ok(Json(state.audit_log.list_all(query.page()).await?))
}

/// GET /audit/logs/user/:id
pub async fn logs_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Result<Page, AppError> {
    Ok(Json(
        state.audit_log.list_by_user(user_id, query.page()).await?,
    ))
}

/// GET /audit/logs/module/:module
pub async fn logs_by_module(
    State(state): State<AppState>,
    Path(module): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Page, AppError> {
    Ok(Json(
        state.audit_log.list_by_module(&module, query.page()).await?,
    ))
}

/// GET /audit/logs/date-range?start_date=..&end_date=..
pub async fn logs_by_date_range(
    State(state): State<AppState>,
    Query(query): Query<DateRangeQuery>,
) -> Result<Page, AppError> {
    let (start, end) = query.bounds()?;
    Ok(Json(
        state
            .audit_log
            .list_by_date_range(start, end, query.page())
            .await?,
    ))
}

/// GET /audit/logs/filter
#[tracing::instrument(skip(state))]
pub async fn logs_by_filters(
    State(state): State<AppState>,
    Query(query): Query<AuditFilterQuery>,
) -> Result<Page, AppError> {
    let filter = query.filter()?;
    Ok(Json(
        state
            .audit_log
            .list_by_filters(&filter, query.page())
            .await?,
    ))
}
