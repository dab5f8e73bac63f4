use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use service_core::error::AppError;

use crate::models::{AuditAction, AuditFilter, PageRequest};

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub size: Option<i64>,
}

impl PageQuery {
    pub fn page(&self) -> PageRequest {
        PageRequest::clamped(self.page, self.size)
    }
}

#[derive(Debug, Deserialize)]
pub struct DateRangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

impl DateRangeQuery {
    /// Both bounds are required. A bare date covers the whole day.
    pub fn bounds(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
        match (self.start_date.as_deref(), self.end_date.as_deref()) {
            (Some(start), Some(end)) if !start.is_empty() && !end.is_empty() => {
                Ok((parse_bound(start, false)?, parse_bound(end, true)?))
            }
            _ => Err(AppError::BadRequest(anyhow::anyhow!(
                "start_date and end_date are required"
            ))),
        }
    }

    pub fn page(&self) -> PageRequest {
        PageRequest::clamped(self.page, self.size)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditFilterQuery {
    pub user_id: Option<i64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub module: Option<String>,
    pub action: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

impl AuditFilterQuery {
    pub fn filter(&self) -> Result<AuditFilter, AppError> {
        fn non_empty(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        }

        Ok(AuditFilter {
            user_id: self.user_id,
            email: non_empty(&self.email),
            role: non_empty(&self.role),
            module: non_empty(&self.module),
            action: non_empty(&self.action)
                .map(|a| a.parse::<AuditAction>())
                .transpose()
                .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?,
            from: non_empty(&self.start_date)
                .map(|s| parse_bound(&s, false))
                .transpose()?,
            to: non_empty(&self.end_date)
                .map(|s| parse_bound(&s, true))
                .transpose()?,
        })
    }

    pub fn page(&self) -> PageRequest {
        PageRequest::clamped(self.page, self.size)
    }
}

/// RFC 3339 timestamp, or `YYYY-MM-DD` meaning the start (or end) of that day in UTC.
pub fn parse_bound(value: &str, end_of_day: bool) -> Result<DateTime<Utc>, AppError> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        AppError::BadRequest(anyhow::anyhow!("Invalid date '{}', expected YYYY-MM-DD or RFC 3339", value))
    })?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
    } else {
        Some(NaiveTime::MIN)
    };
    let time = time.ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Invalid time of day")))?;
    Ok(date.and_time(time).and_utc())
}
