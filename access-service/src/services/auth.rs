use chrono::{DateTime, Utc};
use std::sync::{Arc, OnceLock};

use super::session::SessionAuthority;
use super::store::UserStore;
use super::{ServiceError, TokenError};
use crate::models::Principal;
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

/// Stand-in hash verified when no active user matches the email, so a miss
/// costs the same Argon2 work as a wrong password.
fn dummy_hash() -> Option<&'static PasswordHashString> {
    static DUMMY: OnceLock<Option<PasswordHashString>> = OnceLock::new();
    DUMMY
        .get_or_init(|| hash_password(&Password::new("no-such-user")).ok())
        .as_ref()
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub principal: Principal,
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    sessions: SessionAuthority,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserStore>, sessions: SessionAuthority) -> Self {
        Self { users, sessions }
    }

    /// Exchange credentials for a session token. Unknown email, inactive
    /// account and wrong password are indistinguishable to the caller.
    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, ServiceError> {
        let user = self
            .users
            .find_user_by_email(email)
            .await?
            .filter(|u| u.active);

        let stored = match (&user, dummy_hash()) {
            (Some(user), _) => PasswordHashString::new(user.password_hash.clone()),
            (None, Some(dummy)) => dummy.clone(),
            (None, None) => return Err(ServiceError::InvalidCredentials),
        };
        let matches = verify_password(&Password::new(password), &stored).map_err(|e| {
            tracing::error!(
                user_id = ?user.as_ref().map(|u| u.id),
                error = %e,
                "Stored password hash is unusable"
            );
            ServiceError::InvalidCredentials
        })?;
        let user = match user {
            Some(user) if matches => user,
            _ => return Err(ServiceError::InvalidCredentials),
        };

        let principal = self
            .users
            .find_principal(user.id)
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        let (token, claims) =
            self.sessions
                .issue(principal.user_id, &principal.email, &principal.role_name)?;

        tracing::info!(user_id = principal.user_id, role = %principal.role_name, "User logged in");

        Ok(LoginOutcome {
            token,
            expires_at: claims.expires_at(),
            principal,
        })
    }

    pub async fn logout(&self, token: &str) -> Result<(), ServiceError> {
        self.sessions.revoke(token).await
    }

    /// Validate a bearer token and load the caller's current role.
    pub async fn authenticate(&self, token: &str) -> Result<Principal, ServiceError> {
        let claims = self.sessions.validate(token).await?;
        self.users
            .find_principal(claims.user_id)
            .await?
            .ok_or(ServiceError::Unauthenticated(TokenError::Invalid))
    }
}
