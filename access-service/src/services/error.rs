use service_core::error::AppError;
use std::fmt;
use thiserror::Error;

/// Why a session token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Missing,
    Invalid,
    Expired,
    Revoked,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            TokenError::Missing => "Missing or invalid Authorization header",
            TokenError::Invalid => "Invalid token",
            TokenError::Expired => "Token expired",
            TokenError::Revoked => "Token has been revoked",
        };
        f.write_str(msg)
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Permission kind {permission_kind_id} is not available on module {module_id}")]
    InvalidGrant {
        module_id: i64,
        permission_kind_id: i64,
    },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("{0}")]
    Unauthenticated(TokenError),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The store refused the data itself; retrying cannot succeed.
    #[error("Rejected by storage: {0}")]
    Rejected(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(anyhow::Error),
}

impl ServiceError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ServiceError::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        ServiceError::Conflict(what.into())
    }

    pub fn forbidden(what: impl Into<String>) -> Self {
        ServiceError::Forbidden(what.into())
    }

    pub fn unavailable(msg: impl fmt::Display) -> Self {
        ServiceError::Unavailable(anyhow::anyhow!("{}", msg))
    }

    /// Only outages are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Unavailable(_))
    }
}

/// SQLSTATE class 22 (data exception) and 23 (integrity violation).
fn is_data_error(code: &str) -> bool {
    code.starts_with("22") || code.starts_with("23")
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => return ServiceError::Conflict(db_err.message().to_string()),
                Some(code) if is_data_error(code) => {
                    return ServiceError::Rejected(format!("{} ({})", db_err.message(), code));
                }
                _ => {}
            }
        }
        ServiceError::Unavailable(anyhow::Error::new(err))
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            ServiceError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            e @ ServiceError::InvalidGrant { .. } => AppError::BadRequest(anyhow::anyhow!(e.to_string())),
            ServiceError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::Unauthenticated(reason) => {
                AppError::Unauthorized(anyhow::anyhow!(reason.to_string()))
            }
            // Never reveal which grants exist.
            ServiceError::Forbidden(_) => {
                AppError::Forbidden(anyhow::anyhow!("Insufficient permissions"))
            }
            ServiceError::Rejected(msg) => {
                tracing::warn!(error = %msg, "Storage rejected request data");
                AppError::BadRequest(anyhow::anyhow!("Request data rejected"))
            }
            ServiceError::Unavailable(e) => {
                tracing::error!(error = %e, "Storage unavailable");
                AppError::ServiceUnavailable
            }
        }
    }
}
