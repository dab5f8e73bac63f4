//! Read side of the audit trail.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::store::AuditStore;
use super::ServiceError;
use crate::models::{AuditEvent, AuditFilter, PageRequest, Paginated};

#[derive(Clone)]
pub struct AuditLogService {
    store: Arc<dyn AuditStore>,
}

impl AuditLogService {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    pub async fn list_all(&self, page: PageRequest) -> Result<Paginated<AuditEvent>, ServiceError> {
        self.list_by_filters(&AuditFilter::default(), page).await
    }

    pub async fn list_by_user(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<Paginated<AuditEvent>, ServiceError> {
        let filter = AuditFilter {
            user_id: Some(user_id),
            ..Default::default()
        };
        self.list_by_filters(&filter, page).await
    }

    pub async fn list_by_module(
        &self,
        module: &str,
        page: PageRequest,
    ) -> Result<Paginated<AuditEvent>, ServiceError> {
        let filter = AuditFilter {
            module: Some(module.to_string()),
            ..Default::default()
        };
        self.list_by_filters(&filter, page).await
    }

    /// Inclusive on both ends. An inverted range matches nothing.
    pub async fn list_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page: PageRequest,
    ) -> Result<Paginated<AuditEvent>, ServiceError> {
        if start > end {
            return Ok(Paginated::empty(page));
        }
        let filter = AuditFilter {
            from: Some(start),
            to: Some(end),
            ..Default::default()
        };
        self.list_by_filters(&filter, page).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_by_filters(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Paginated<AuditEvent>, ServiceError> {
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Ok(Paginated::empty(page));
            }
        }
        let (items, total) = self.store.find_audit_events(filter, page).await?;
        Ok(Paginated::new(items, page, total))
    }
}
