/// Configuration management for the identity core
use crate::error::{IdentityError, IdentityResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

const MIN_SECRET_LEN: usize = 32;

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub tokens: TokenConfig,
    pub sessions: SessionPolicyConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Recorded as the producer of staged events
    pub name: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub max_connections: u32,
}

/// Token signing and fingerprint configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub issuer: String,
    #[serde(skip_serializing)]
    pub access_secret: String,
    #[serde(skip_serializing)]
    pub refresh_secret: String,
    #[serde(skip_serializing)]
    pub refresh_hash_key: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub leeway_secs: u64,
}

// Secrets stay out of logs
impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("issuer", &self.issuer)
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("refresh_hash_key", &"<redacted>")
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

/// Session invalidation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPolicyConfig {
    /// Delete every session of an account when its username changes
    pub revoke_on_username_change: bool,
}

impl Default for SessionPolicyConfig {
    fn default() -> Self {
        Self {
            revoke_on_username_change: true,
        }
    }
}

/// Outbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    pub topic: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl IdentityConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> IdentityResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(get: F) -> IdentityResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| {
            get(key).ok_or_else(|| IdentityError::Config(format!("{} is required", key)))
        };

        let name = var("IDENTITY_SERVICE_NAME", "identity-core");

        let database_path: PathBuf = var("IDENTITY_DATABASE_PATH", "./data/identity.sqlite").into();
        let max_connections = var("IDENTITY_DB_MAX_CONNECTIONS", "10")
            .parse()
            .map_err(|_| IdentityError::Config("Invalid IDENTITY_DB_MAX_CONNECTIONS".to_string()))?;

        let tokens = TokenConfig {
            issuer: var("IDENTITY_JWT_ISSUER", "identity-core"),
            access_secret: required("IDENTITY_ACCESS_SECRET")?,
            refresh_secret: required("IDENTITY_REFRESH_SECRET")?,
            refresh_hash_key: required("IDENTITY_REFRESH_HASH_KEY")?,
            access_ttl_secs: var("IDENTITY_ACCESS_TTL_SECS", "900")
                .parse()
                .map_err(|_| IdentityError::Config("Invalid IDENTITY_ACCESS_TTL_SECS".to_string()))?,
            refresh_ttl_secs: var("IDENTITY_REFRESH_TTL_SECS", "2592000")
                .parse()
                .map_err(|_| {
                    IdentityError::Config("Invalid IDENTITY_REFRESH_TTL_SECS".to_string())
                })?,
            leeway_secs: var("IDENTITY_TOKEN_LEEWAY_SECS", "0")
                .parse()
                .map_err(|_| {
                    IdentityError::Config("Invalid IDENTITY_TOKEN_LEEWAY_SECS".to_string())
                })?,
        };

        let revoke_on_username_change = var("IDENTITY_REVOKE_SESSIONS_ON_USERNAME_CHANGE", "true")
            .parse()
            .map_err(|_| {
                IdentityError::Config(
                    "IDENTITY_REVOKE_SESSIONS_ON_USERNAME_CHANGE must be true or false".to_string(),
                )
            })?;

        let format = match var("IDENTITY_LOG_FORMAT", "pretty").to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            service: ServiceConfig { name },
            storage: StorageConfig {
                database_path,
                max_connections,
            },
            tokens,
            sessions: SessionPolicyConfig {
                revoke_on_username_change,
            },
            events: EventsConfig {
                topic: var("IDENTITY_OUTBOX_TOPIC", "accounts.v1"),
            },
            logging: LoggingConfig {
                level: var("RUST_LOG", "info"),
                format,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> IdentityResult<()> {
        if self.tokens.issuer.is_empty() {
            return Err(IdentityError::Config("JWT issuer cannot be empty".to_string()));
        }

        for (name, secret) in [
            ("access secret", &self.tokens.access_secret),
            ("refresh secret", &self.tokens.refresh_secret),
            ("refresh hash key", &self.tokens.refresh_hash_key),
        ] {
            if secret.len() < MIN_SECRET_LEN {
                return Err(IdentityError::Config(format!(
                    "{} must be at least {} bytes",
                    name, MIN_SECRET_LEN
                )));
            }
        }

        if self.tokens.access_secret == self.tokens.refresh_secret {
            return Err(IdentityError::Config(
                "access and refresh secrets must differ".to_string(),
            ));
        }

        if self.tokens.access_ttl_secs <= 0 || self.tokens.refresh_ttl_secs <= 0 {
            return Err(IdentityError::Config("token TTLs must be positive".to_string()));
        }

        if self.tokens.access_ttl_secs >= self.tokens.refresh_ttl_secs {
            return Err(IdentityError::Config(
                "access TTL must be shorter than refresh TTL".to_string(),
            ));
        }

        if self.storage.max_connections == 0 {
            return Err(IdentityError::Config(
                "database pool needs at least one connection".to_string(),
            ));
        }

        Ok(())
    }
}
