//! User model and the authenticated principal derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User entity. Exactly one role per user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub role_id: i64,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The caller of a request once its token has been validated. Role data is
/// read from storage, never trusted from token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Principal {
    pub user_id: i64,
    pub email: String,
    pub role_id: i64,
    pub role_name: String,
}
