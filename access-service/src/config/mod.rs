use secrecy::{ExposeSecret, Secret, SecretString};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AccessConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub access: AccessPolicyConfig,
    pub audit: AuditConfig,
    pub sessions: SessionConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize)]
pub struct JwtConfig {
    pub secret: SecretString,
    pub expiry_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessPolicyConfig {
    /// Role that bypasses grant checks. Compared case-insensitively.
    pub superuser_role: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    pub queue_capacity: usize,
    pub workers: usize,
    pub max_retry_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub sweep_interval_seconds: u64,
}

impl SessionConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

impl AccessConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AccessConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("access-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            jwt: JwtConfig {
                secret: Secret::new(get_env("JWT_SECRET", None, is_prod)?),
                expiry_hours: parse_env("JWT_EXPIRY_HOURS", "24", is_prod)?,
            },
            access: AccessPolicyConfig {
                superuser_role: get_env("SUPERUSER_ROLE", Some("SUPERADMIN"), false)?,
            },
            audit: AuditConfig {
                queue_capacity: parse_env("AUDIT_QUEUE_CAPACITY", "1024", false)?,
                workers: parse_env("AUDIT_WORKERS", "2", false)?,
                max_retry_seconds: parse_env("AUDIT_MAX_RETRY_SECONDS", "30", false)?,
            },
            sessions: SessionConfig {
                sweep_interval_seconds: parse_env("TOKEN_SWEEP_INTERVAL_SECONDS", "86400", false)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.expiry_hours <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_EXPIRY_HOURS must be positive"
            )));
        }

        let secret_len = self.jwt.secret.expose_secret().len();
        if secret_len == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must not be empty"
            )));
        }

        if self.audit.workers == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "AUDIT_WORKERS must be at least 1"
            )));
        }

        if self.audit.queue_capacity == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "AUDIT_QUEUE_CAPACITY must be greater than 0"
            )));
        }

        if self.sessions.sweep_interval_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TOKEN_SWEEP_INTERVAL_SECONDS must be greater than 0"
            )));
        }

        if self.environment == Environment::Prod {
            if secret_len < 32 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_SECRET must be at least 32 bytes in production"
                )));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(environment: Environment, secret: &str) -> AccessConfig {
        AccessConfig {
            common: core_config::Config::default(),
            environment,
            service_name: "access-service".to_string(),
            service_version: "test".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: "postgres://localhost/access_test".to_string(),
                max_connections: 5,
                min_connections: 1,
            },
            jwt: JwtConfig {
                secret: Secret::new(secret.to_string()),
                expiry_hours: 24,
            },
            access: AccessPolicyConfig {
                superuser_role: "SUPERADMIN".to_string(),
            },
            audit: AuditConfig {
                queue_capacity: 1024,
                workers: 2,
                max_retry_seconds: 30,
            },
            sessions: SessionConfig {
                sweep_interval_seconds: 86_400,
            },
            security: SecurityConfig {
                allowed_origins: vec!["http://localhost:3000".to_string()],
            },
        }
    }

    #[test]
    fn parses_environment() {
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Prod));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn short_secret_is_rejected_only_in_prod() {
        assert!(config(Environment::Dev, "short").validate().is_ok());
        assert!(config(Environment::Prod, "short").validate().is_err());
        assert!(config(Environment::Prod, &"k".repeat(32)).validate().is_ok());
    }

    #[test]
    fn rejects_zero_workers_and_empty_secret() {
        let mut no_workers = config(Environment::Dev, "secret");
        no_workers.audit.workers = 0;
        assert!(no_workers.validate().is_err());

        assert!(config(Environment::Dev, "").validate().is_err());
    }

    #[test]
    fn wildcard_origin_is_rejected_in_prod() {
        let mut cfg = config(Environment::Prod, &"k".repeat(40));
        cfg.security.allowed_origins = vec!["*".to_string()];
        assert!(cfg.validate().is_err());
    }
}
