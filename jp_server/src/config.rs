//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use jackpot::{
    PlatformConfig,
    auth::MIN_SECRET_LEN,
    db::DatabaseConfig,
    draw::SchedulerConfig,
    referral::ReferralConfig,
    tickets::IssuanceConfig,
};
use std::net::SocketAddr;
use std::time::Duration;

/// Where balances live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// In-process store; state is lost on exit
    Memory,
}

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Prometheus scrape address; no exporter when unset
    pub metrics_bind: Option<SocketAddr>,
    pub storage: StorageBackend,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Security configuration
    pub security: SecurityConfig,
    pub platform: PlatformConfig,
    pub scheduler: SchedulerConfig,
    /// Lifetime of cached jackpot reads
    pub cache_ttl: Duration,
}

/// Security-related configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// HS256 secret shared with the identity provider (required)
    pub jwt_secret: String,
    /// NOWPayments IPN secret (required)
    pub ipn_secret: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    /// * `memory` - Use the in-process store instead of PostgreSQL
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
        memory: bool,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => parse_addr_env("SERVER_BIND")?.unwrap_or(SocketAddr::from(([127, 0, 0, 1], 8080))),
        };
        let metrics_bind = parse_addr_env("METRICS_BIND")?;

        let mut database = DatabaseConfig::from_env();
        if let Some(url) = database_url_override {
            database.database_url = url;
        }

        let jwt_secret = std::env::var("JWT_SECRET").map_err(|_| ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Use the secret your identity provider signs access tokens with".to_string(),
        })?;
        let ipn_secret =
            std::env::var("NOWPAYMENTS_IPN_SECRET").map_err(|_| ConfigError::MissingRequired {
                var: "NOWPAYMENTS_IPN_SECRET".to_string(),
                hint: "Copy it from the NOWPayments dashboard".to_string(),
            })?;

        let referral = ReferralConfig::from_env().map_err(|e| ConfigError::Invalid {
            var: "REFERRAL_BONUS_PERCENTAGE".to_string(),
            reason: e.to_string(),
        })?;

        Ok(ServerConfig {
            bind,
            metrics_bind,
            storage: if memory {
                StorageBackend::Memory
            } else {
                StorageBackend::Postgres
            },
            database,
            security: SecurityConfig {
                jwt_secret,
                ipn_secret,
            },
            platform: PlatformConfig {
                issuance: IssuanceConfig::from_env(),
                referral,
            },
            scheduler: SchedulerConfig::from_env(),
            cache_ttl: Duration::from_secs(parse_env_or("CACHE_TTL_SECS", 10)),
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET".to_string(),
                reason: format!("Must be at least {MIN_SECRET_LEN} characters"),
            });
        }

        if self.security.ipn_secret.trim().is_empty() {
            return Err(ConfigError::Invalid {
                var: "NOWPAYMENTS_IPN_SECRET".to_string(),
                reason: "Must not be empty".to_string(),
            });
        }

        if self.storage == StorageBackend::Postgres
            && self.database.min_connections > self.database.max_connections
        {
            return Err(ConfigError::Invalid {
                var: "DB_MIN_CONNECTIONS".to_string(),
                reason: format!(
                    "Must not exceed DB_MAX_CONNECTIONS ({})",
                    self.database.max_connections
                ),
            });
        }

        if self.scheduler.stale_after <= self.scheduler.poll_interval {
            return Err(ConfigError::Invalid {
                var: "DRAW_STALE_AFTER_SECS".to_string(),
                reason: format!(
                    "Must be longer than the poll interval ({}s)",
                    self.scheduler.poll_interval.as_secs()
                ),
            });
        }

        if self.metrics_bind == Some(self.bind) {
            return Err(ConfigError::Invalid {
                var: "METRICS_BIND".to_string(),
                reason: "Must differ from the server bind address".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

fn parse_addr_env(key: &str) -> Result<Option<SocketAddr>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value.parse().map(Some).map_err(|_| ConfigError::Invalid {
            var: key.to_string(),
            reason: format!("'{value}' is not an IP:PORT address"),
        }),
        Err(_) => Ok(None),
    }
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
