//! Revoked session token. Presence of a row means the token is unusable.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TokenRecord {
    pub id: i64,
    #[serde(skip_serializing)]
    pub token: String,
    pub expires_at: DateTime<Utc>,
}
