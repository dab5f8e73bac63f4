//! Audit event model - the append-only activity trail.

use axum::http::Method;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

/// Widths of the bounded `audit_logs` text columns, in characters.
pub mod column_width {
    pub const ACTOR_EMAIL: usize = 255;
    pub const ACTOR_ROLE: usize = 50;
    pub const MODULE: usize = 100;
    pub const ENTITY_TYPE: usize = 50;
    pub const ENTITY_ID: usize = 64;
    pub const IP: usize = 64;
    pub const METHOD: usize = 10;
}

/// What an audited request did. CRUD actions come from the HTTP verb; the
/// remaining variants are explicit markers set by the request pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Read,
    Create,
    Update,
    Delete,
    AccessDenied,
    LoginFailed,
    Login,
    Logout,
    Unknown,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Read => "read",
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::AccessDenied => "access_denied",
            AuditAction::LoginFailed => "login_failed",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::Unknown => "unknown",
        }
    }

    pub fn from_method(method: &Method) -> Self {
        match *method {
            Method::GET | Method::HEAD => AuditAction::Read,
            Method::POST => AuditAction::Create,
            Method::PUT | Method::PATCH => AuditAction::Update,
            Method::DELETE => AuditAction::Delete,
            _ => AuditAction::Unknown,
        }
    }
}

impl FromStr for AuditAction {
    type Err = String;

    /// Accepts the stored form (`access_denied`) as well as `AccessDenied`
    /// or `access-denied`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match folded.as_str() {
            "read" => Ok(AuditAction::Read),
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "delete" => Ok(AuditAction::Delete),
            "accessdenied" => Ok(AuditAction::AccessDenied),
            "loginfailed" => Ok(AuditAction::LoginFailed),
            "login" => Ok(AuditAction::Login),
            "logout" => Ok(AuditAction::Logout),
            "unknown" => Ok(AuditAction::Unknown),
            _ => Err(format!("Unknown audit action: {}", s)),
        }
    }
}

/// Persisted audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AuditEvent {
    pub id: i64,
    pub actor_user_id: Option<i64>,
    pub actor_email: Option<String>,
    pub actor_role: Option<String>,
    pub module: Option<String>,
    pub action: String,
    pub permission_used: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub status_code: i32,
    pub path: String,
    pub method: String,
    pub occurred_at: DateTime<Utc>,
}

/// Audit event as captured on the request path, before storage assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAuditEvent {
    pub actor_user_id: Option<i64>,
    pub actor_email: Option<String>,
    pub actor_role: Option<String>,
    pub module: Option<String>,
    pub action: AuditAction,
    pub permission_used: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub status_code: i32,
    pub path: String,
    pub method: String,
    pub occurred_at: DateTime<Utc>,
}

impl NewAuditEvent {
    /// Bare event for a request; the capture layer fills in the rest.
    pub fn request(
        method: &Method,
        path: impl Into<String>,
        status_code: u16,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            actor_user_id: None,
            actor_email: None,
            actor_role: None,
            module: None,
            action: AuditAction::from_method(method),
            permission_used: None,
            entity_type: None,
            entity_id: None,
            before_state: None,
            after_state: None,
            ip: None,
            user_agent: None,
            status_code: i32::from(status_code),
            path: path.into(),
            method: method.as_str().to_string(),
            occurred_at,
        }
    }

    /// Cut request-supplied text down to the column widths so an oversized
    /// header or path can never make the row unstorable.
    pub fn fit_to_columns(mut self) -> Self {
        clip(&mut self.actor_email, column_width::ACTOR_EMAIL);
        clip(&mut self.actor_role, column_width::ACTOR_ROLE);
        clip(&mut self.module, column_width::MODULE);
        clip(&mut self.entity_type, column_width::ENTITY_TYPE);
        clip(&mut self.entity_id, column_width::ENTITY_ID);
        clip(&mut self.ip, column_width::IP);
        if let Some(end) = char_boundary(&self.method, column_width::METHOD) {
            self.method.truncate(end);
        }
        self
    }

    /// First field that would not fit its column, if any.
    pub fn oversized_field(&self) -> Option<&'static str> {
        let too_long = |value: &Option<String>, max: usize| {
            value.as_deref().is_some_and(|v| v.chars().count() > max)
        };
        [
            ("actor_email", too_long(&self.actor_email, column_width::ACTOR_EMAIL)),
            ("actor_role", too_long(&self.actor_role, column_width::ACTOR_ROLE)),
            ("module", too_long(&self.module, column_width::MODULE)),
            ("entity_type", too_long(&self.entity_type, column_width::ENTITY_TYPE)),
            ("entity_id", too_long(&self.entity_id, column_width::ENTITY_ID)),
            ("ip", too_long(&self.ip, column_width::IP)),
            ("method", self.method.chars().count() > column_width::METHOD),
        ]
        .into_iter()
        .find_map(|(field, over)| over.then_some(field))
    }

    pub fn into_event(self, id: i64) -> AuditEvent {
        AuditEvent {
            id,
            actor_user_id: self.actor_user_id,
            actor_email: self.actor_email,
            actor_role: self.actor_role,
            module: self.module,
            action: self.action.as_str().to_string(),
            permission_used: self.permission_used,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            before_state: self.before_state,
            after_state: self.after_state,
            ip: self.ip,
            user_agent: self.user_agent,
            status_code: self.status_code,
            path: self.path,
            method: self.method,
            occurred_at: self.occurred_at,
        }
    }
}

/// Byte offset of the `max_chars`-th character, when the text is longer.
fn char_boundary(value: &str, max_chars: usize) -> Option<usize> {
    value.char_indices().nth(max_chars).map(|(idx, _)| idx)
}

fn clip(value: &mut Option<String>, max_chars: usize) {
    if let Some(text) = value {
        if let Some(end) = char_boundary(text, max_chars) {
            text.truncate(end);
        }
    }
}

/// Conjunctive filter over the audit trail. `None` fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    pub user_id: Option<i64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub module: Option<String>,
    pub action: Option<AuditAction>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AuditFilter {
    /// In-memory evaluation with the same semantics as the SQL query:
    /// case-insensitive text matches, inclusive date bounds.
    pub fn matches(&self, event: &AuditEvent) -> bool {
        fn eq_ci(wanted: &Option<String>, actual: &Option<String>) -> bool {
            match wanted {
                None => true,
                Some(w) => actual
                    .as_deref()
                    .is_some_and(|a| a.eq_ignore_ascii_case(w)),
            }
        }

        self.user_id.map_or(true, |id| event.actor_user_id == Some(id))
            && eq_ci(&self.email, &event.actor_email)
            && eq_ci(&self.role, &event.actor_role)
            && eq_ci(&self.module, &event.module)
            && self.action.map_or(true, |a| event.action == a.as_str())
            && self.from.map_or(true, |from| event.occurred_at >= from)
            && self.to.map_or(true, |to| event.occurred_at <= to)
    }
}

/// Clamped pagination parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    pub page: i64,
    pub size: i64,
}

impl PageRequest {
    pub const DEFAULT_PAGE: i64 = 1;
    pub const DEFAULT_SIZE: i64 = 10;
    pub const MAX_SIZE: i64 = 100;

    /// Out-of-range values are clamped rather than rejected.
    pub fn clamped(page: Option<i64>, size: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(Self::DEFAULT_PAGE).max(1),
            size: size.unwrap_or(Self::DEFAULT_SIZE).clamp(1, Self::MAX_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::clamped(None, None)
    }
}

/// One page of results plus the total match count.
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub size: i64,
    pub total: i64,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, page: PageRequest, total: i64) -> Self {
        Self {
            items,
            page: page.page,
            size: page.size,
            total,
        }
    }

    pub fn empty(page: PageRequest) -> Self {
        Self::new(Vec::new(), page, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_defaults_and_clamps() {
        assert_eq!(PageRequest::default(), PageRequest { page: 1, size: 10 });
        assert_eq!(
            PageRequest::clamped(Some(0), Some(-5)),
            PageRequest { page: 1, size: 1 }
        );
        assert_eq!(
            PageRequest::clamped(Some(3), Some(1_000)),
            PageRequest { page: 3, size: 100 }
        );
        assert_eq!(PageRequest::clamped(Some(3), Some(20)).offset(), 40);
    }

    #[test]
    fn action_follows_http_verb() {
        assert_eq!(AuditAction::from_method(&Method::GET), AuditAction::Read);
        assert_eq!(AuditAction::from_method(&Method::POST), AuditAction::Create);
        assert_eq!(AuditAction::from_method(&Method::PUT), AuditAction::Update);
        assert_eq!(AuditAction::from_method(&Method::PATCH), AuditAction::Update);
        assert_eq!(AuditAction::from_method(&Method::DELETE), AuditAction::Delete);
    }

    #[test]
    fn action_parses_marker_spellings() {
        for spelling in ["access_denied", "AccessDenied", "ACCESS-DENIED"] {
            assert_eq!(spelling.parse::<AuditAction>(), Ok(AuditAction::AccessDenied));
        }
        assert_eq!("LoginFailed".parse::<AuditAction>(), Ok(AuditAction::LoginFailed));
        assert!("denied".parse::<AuditAction>().is_err());
    }

    #[test]
    fn oversized_request_fields_are_clipped_to_columns() {
        let mut event = NewAuditEvent::request(&Method::GET, "/x", 404, Utc::now());
        event.ip = Some("1.2.3.4,".repeat(20));
        event.module = Some("é".repeat(150));
        event.actor_email = Some("a".repeat(300));
        assert_eq!(event.oversized_field(), Some("actor_email"));

        let event = event.fit_to_columns();
        assert_eq!(event.oversized_field(), None);
        assert_eq!(event.ip.as_deref().map(str::len), Some(column_width::IP));
        assert_eq!(
            event.module.as_deref().map(|m| m.chars().count()),
            Some(column_width::MODULE)
        );
        assert_eq!(
            event.actor_email.as_deref().map(str::len),
            Some(column_width::ACTOR_EMAIL)
        );
    }

    #[test]
    fn filter_matches_case_insensitively_with_inclusive_bounds() {
        let at = Utc::now();
        let mut event = NewAuditEvent::request(&Method::GET, "/modules", 200, at).into_event(1);
        event.actor_email = Some("Ana@Example.com".to_string());
        event.module = Some("Reports".to_string());

        let filter = AuditFilter {
            email: Some("ana@example.com".to_string()),
            module: Some("reports".to_string()),
            from: Some(at),
            to: Some(at),
            ..Default::default()
        };
        assert!(filter.matches(&event));

        let other_user = AuditFilter {
            user_id: Some(7),
            ..Default::default()
        };
        assert!(!other_user.matches(&event));
    }
}
