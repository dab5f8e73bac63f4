//! Session token lifecycle: issue, validate, revoke and sweep.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::jwt::{JwtService, SessionClaims};
use super::store::TokenStore;
use super::{Clock, ServiceError, TokenError};

#[derive(Clone)]
pub struct SessionAuthority {
    jwt: JwtService,
    tokens: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
}

impl SessionAuthority {
    pub fn new(jwt: JwtService, tokens: Arc<dyn TokenStore>, clock: Arc<dyn Clock>) -> Self {
        Self { jwt, tokens, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn issue(
        &self,
        user_id: i64,
        email: &str,
        role: &str,
    ) -> Result<(String, SessionClaims), ServiceError> {
        self.jwt
            .issue(user_id, email, role, self.clock.now())
            .map_err(ServiceError::Unavailable)
    }

    /// Signature first, then expiry, then the revocation list. An expired
    /// token is rejected without a storage round trip.
    pub async fn validate(&self, token: &str) -> Result<SessionClaims, ServiceError> {
        let claims = self.check_unexpired(token)?;

        if self.tokens.is_token_revoked(token).await? {
            return Err(ServiceError::Unauthenticated(TokenError::Revoked));
        }

        Ok(claims)
    }

    /// Put a token on the revocation list until it expires. Revoking twice is fine.
    pub async fn revoke(&self, token: &str) -> Result<(), ServiceError> {
        let claims = self.check_unexpired(token)?;

        let inserted = self
            .tokens
            .revoke_token(token, claims.expires_at())
            .await?;
        if !inserted {
            tracing::debug!(user_id = claims.user_id, "Token was already revoked");
        }
        Ok(())
    }

    /// Drop revocation entries whose token has expired anyway.
    pub async fn sweep_expired(&self) -> Result<u64, ServiceError> {
        let removed = self.tokens.delete_expired_tokens(self.clock.now()).await?;
        metrics::counter!("revoked_tokens_swept_total").increment(removed);
        Ok(removed)
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `period` until cancelled.
    /// The first sweep happens one period after start.
    pub fn spawn_sweeper(&self, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let authority = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Token sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match authority.sweep_expired().await {
                            Ok(removed) => tracing::info!(removed, "Swept expired revoked tokens"),
                            Err(e) => tracing::error!(error = %e, "Token sweep failed"),
                        }
                    }
                }
            }
        })
    }

    fn check_unexpired(&self, token: &str) -> Result<SessionClaims, ServiceError> {
        let claims = self.jwt.decode(token).map_err(ServiceError::Unauthenticated)?;
        if self.clock.now().timestamp() >= claims.exp {
            return Err(ServiceError::Unauthenticated(TokenError::Expired));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::services::{ManualClock, MemoryStore};
    use secrecy::Secret;

    fn authority() -> (SessionAuthority, Arc<MemoryStore>, Arc<ManualClock>) {
        let jwt = JwtService::new(&JwtConfig {
            secret: Secret::new("session-test-secret-session-test-secret".to_string()),
            expiry_hours: 24,
        })
        .unwrap();
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        (
            SessionAuthority::new(jwt, store.clone(), clock.clone()),
            store,
            clock,
        )
    }

    #[tokio::test]
    async fn revoked_token_is_rejected() {
        let (sessions, _, _) = authority();
        let (token, _) = sessions.issue(1, "a@b.c", "Auditor").unwrap();

        sessions.validate(&token).await.unwrap();
        sessions.revoke(&token).await.unwrap();
        sessions.revoke(&token).await.unwrap();

        let err = sessions.validate(&token).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Unauthenticated(TokenError::Revoked)
        ));
    }

    #[tokio::test]
    async fn expiry_wins_over_revocation_and_skips_storage() {
        let (sessions, store, clock) = authority();
        let (token, _) = sessions.issue(1, "a@b.c", "Auditor").unwrap();
        sessions.revoke(&token).await.unwrap();

        clock.advance(chrono::Duration::hours(24));
        store.set_offline(true);

        let err = sessions.validate(&token).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Unauthenticated(TokenError::Expired)
        ));
    }

    #[tokio::test]
    async fn revocation_lookup_failure_fails_closed() {
        let (sessions, store, _) = authority();
        let (token, _) = sessions.issue(1, "a@b.c", "Auditor").unwrap();
        store.set_offline(true);

        let err = sessions.validate(&token).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable(_)));
    }

    #[tokio::test]
    async fn sweep_keeps_entries_until_expiry() {
        let (sessions, store, clock) = authority();
        let (token, _) = sessions.issue(1, "a@b.c", "Auditor").unwrap();
        sessions.revoke(&token).await.unwrap();

        assert_eq!(sessions.sweep_expired().await.unwrap(), 0);
        assert_eq!(store.revoked_token_count(), 1);

        clock.advance(chrono::Duration::hours(25));
        assert_eq!(sessions.sweep_expired().await.unwrap(), 1);
        assert_eq!(store.revoked_token_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_on_cancel() {
        let (sessions, _, _) = authority();
        let shutdown = CancellationToken::new();
        let handle = sessions.spawn_sweeper(Duration::from_secs(60), shutdown.clone());

        tokio::time::advance(Duration::from_secs(61)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}
