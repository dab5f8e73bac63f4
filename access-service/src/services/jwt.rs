use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TokenError;
use crate::config::JwtConfig;

/// Signs and verifies session tokens (HS256).
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user_id: i64,
    pub email: String,
    /// Role name at issue time. Informational only; authorization re-reads the role.
    pub role: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// JWT ID, makes every issued token distinct
    pub jti: String,
}

impl SessionClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let secret = config.secret.expose_secret().as_bytes();
        if secret.is_empty() {
            anyhow::bail!("JWT secret must not be empty");
        }

        tracing::info!("JWT service initialized with HS256 secret");

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            expiry_hours: config.expiry_hours,
        })
    }

    /// Sign a token valid from `now` for the configured lifetime.
    pub fn issue(
        &self,
        user_id: i64,
        email: &str,
        role: &str,
        now: DateTime<Utc>,
    ) -> Result<(String, SessionClaims), anyhow::Error> {
        let exp = now + Duration::hours(self.expiry_hours);

        let claims = SessionClaims {
            user_id,
            email: email.to_string(),
            role: role.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode session token: {}", e))?;

        Ok((token, claims))
    }

    /// Verify the signature and decode the claims. Expiry is left to the
    /// caller so it can be judged against the injected clock.
    pub fn decode(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Rejected session token");
                TokenError::Invalid
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn service(secret: &str) -> JwtService {
        JwtService::new(&JwtConfig {
            secret: Secret::new(secret.to_string()),
            expiry_hours: 24,
        })
        .unwrap()
    }

    #[test]
    fn issued_token_decodes_to_same_claims() {
        let jwt = service("test-secret-that-is-long-enough-for-hs256");
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();

        let (token, claims) = jwt.issue(7, "ana@example.com", "Auditor", now).unwrap();
        let decoded = jwt.decode(&token).unwrap();

        assert_eq!(decoded, claims);
        assert_eq!(decoded.expires_at(), now + Duration::hours(24));
    }

    #[test]
    fn expired_token_still_decodes() {
        let jwt = service("test-secret-that-is-long-enough-for-hs256");
        let long_ago = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap();

        let (token, _) = jwt.issue(1, "a@b.c", "SUPERADMIN", long_ago).unwrap();
        assert!(jwt.decode(&token).is_ok());
    }

    #[test]
    fn foreign_signature_is_invalid() {
        let (token, _) = service("first-secret-first-secret-first-secret")
            .issue(1, "a@b.c", "Auditor", Utc::now())
            .unwrap();

        let other = service("second-secret-second-secret-second-secret");
        assert_eq!(other.decode(&token), Err(TokenError::Invalid));
        assert_eq!(other.decode("not-a-jwt"), Err(TokenError::Invalid));
    }

    #[test]
    fn tokens_issued_together_differ() {
        let jwt = service("test-secret-that-is-long-enough-for-hs256");
        let now = Utc::now();
        let (a, _) = jwt.issue(1, "a@b.c", "Auditor", now).unwrap();
        let (b, _) = jwt.issue(1, "a@b.c", "Auditor", now).unwrap();
        assert_ne!(a, b);
    }
}
