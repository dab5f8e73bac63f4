//! Permission catalog - the fixed set of permission kinds.

use axum::http::Method;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// The four permission codes. No other codes exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PermissionCode {
    #[serde(rename = "R")]
    Read,
    #[serde(rename = "W")]
    Write,
    #[serde(rename = "X")]
    Export,
    #[serde(rename = "D")]
    Delete,
}

impl PermissionCode {
    pub const ALL: [PermissionCode; 4] = [
        PermissionCode::Read,
        PermissionCode::Write,
        PermissionCode::Export,
        PermissionCode::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionCode::Read => "R",
            PermissionCode::Write => "W",
            PermissionCode::Export => "X",
            PermissionCode::Delete => "D",
        }
    }

    /// Permission implied by an HTTP verb when no explicit check was recorded.
    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::GET | Method::HEAD => Some(PermissionCode::Read),
            Method::POST | Method::PUT | Method::PATCH => Some(PermissionCode::Write),
            Method::DELETE => Some(PermissionCode::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for PermissionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "R" => Ok(PermissionCode::Read),
            "W" => Ok(PermissionCode::Write),
            "X" => Ok(PermissionCode::Export),
            "D" => Ok(PermissionCode::Delete),
            other => Err(format!("Unknown permission code: {}", other)),
        }
    }
}

/// Catalog entry, seeded once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PermissionKind {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: String,
}

impl PermissionKind {
    pub fn permission_code(&self) -> Option<PermissionCode> {
        self.code.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_codes_case_insensitively() {
        assert_eq!("r".parse::<PermissionCode>(), Ok(PermissionCode::Read));
        assert_eq!("X".parse::<PermissionCode>(), Ok(PermissionCode::Export));
        assert!("Z".parse::<PermissionCode>().is_err());
    }

    #[test]
    fn infers_permission_from_method() {
        assert_eq!(
            PermissionCode::from_method(&Method::GET),
            Some(PermissionCode::Read)
        );
        assert_eq!(
            PermissionCode::from_method(&Method::PATCH),
            Some(PermissionCode::Write)
        );
        assert_eq!(
            PermissionCode::from_method(&Method::DELETE),
            Some(PermissionCode::Delete)
        );
        assert_eq!(PermissionCode::from_method(&Method::OPTIONS), None);
    }

    #[test]
    fn serializes_as_single_letter() {
        let json = serde_json::to_string(&PermissionCode::Export).unwrap();
        assert_eq!(json, "\"X\"");
    }
}
