//! Configuration management for the raffle service.
//!
//! Loads configuration from environment variables with sensible defaults. The
//! server binary reads a `.env` file first (via `dotenvy`), so either source works.

use crate::app::services::DEFAULT_SNAPSHOT_INTERVAL;
use crate::identity::StaticIdentityResolver;
use crate::retry::RetryPolicy;
use crate::types::RegistrationScope;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set to a value that cannot be used
    #[error("Invalid value for {key}: {reason}")]
    Invalid {
        /// Environment variable name
        key: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP and metrics listeners
    pub server: ServerConfig,
    /// Event store database
    pub postgres: PostgresConfig,
    /// Raffle policy and contention handling
    pub raffle: RaffleConfig,
    /// Static credentials
    pub identity: IdentityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Metrics server host (for Prometheus scraping)
    pub metrics_host: String,
    /// Metrics server port
    pub metrics_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Connection URL; `None` selects the in-memory event store
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
}

/// Raffle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaffleConfig {
    /// Scope of the duplicate-registration check
    pub registration_scope: RegistrationScope,
    /// Retries after a lost append race before `TransientConflict`
    pub max_conflict_retries: usize,
    /// First backoff delay in milliseconds
    pub retry_initial_delay_ms: u64,
    /// Backoff cap in milliseconds
    pub retry_max_delay_ms: u64,
    /// Seed for reproducible draws; `None` uses the thread RNG
    pub seed: Option<u64>,
    /// Events between stream snapshots; 0 disables snapshots
    pub snapshot_interval: u64,
}

/// Identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// `token:uuid:role` entries, comma-separated
    pub tokens: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for an unknown registration scope or a
    /// malformed identity list.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let registration_scope = match lookup("RAFFLE_REGISTRATION_SCOPE") {
            Some(value) => {
                RegistrationScope::from_str(value.trim()).map_err(|reason| ConfigError::Invalid {
                    key: "RAFFLE_REGISTRATION_SCOPE",
                    reason,
                })?
            }
            None => RegistrationScope::default(),
        };

        let identity = IdentityConfig {
            tokens: lookup("RAFFLE_IDENTITIES").unwrap_or_default(),
        };
        identity.resolver()?;

        Ok(Self {
            server: ServerConfig {
                host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_var(&lookup, "PORT").unwrap_or(8080),
                metrics_host: lookup("METRICS_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                metrics_port: parse_var(&lookup, "METRICS_PORT").unwrap_or(9090),
                shutdown_timeout: parse_var(&lookup, "SHUTDOWN_TIMEOUT").unwrap_or(30),
            },
            postgres: PostgresConfig {
                url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
                max_connections: parse_var(&lookup, "DATABASE_MAX_CONNECTIONS").unwrap_or(10),
                connect_timeout: parse_var(&lookup, "DATABASE_CONNECT_TIMEOUT").unwrap_or(30),
            },
            raffle: RaffleConfig {
                registration_scope,
                max_conflict_retries: parse_var(&lookup, "RAFFLE_MAX_CONFLICT_RETRIES").unwrap_or(8),
                retry_initial_delay_ms: parse_var(&lookup, "RAFFLE_RETRY_INITIAL_DELAY_MS").unwrap_or(5),
                retry_max_delay_ms: parse_var(&lookup, "RAFFLE_RETRY_MAX_DELAY_MS").unwrap_or(200),
                seed: parse_var(&lookup, "RAFFLE_SEED"),
                snapshot_interval: parse_var(&lookup, "RAFFLE_SNAPSHOT_INTERVAL")
                    .unwrap_or(DEFAULT_SNAPSHOT_INTERVAL),
            },
            identity,
        })
    }

    /// Address of the HTTP listener, as `host:port`
    #[must_use]
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Address of the Prometheus listener.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `METRICS_HOST` is not an IP address.
    pub fn metrics_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.server.metrics_host, self.server.metrics_port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "METRICS_HOST",
                reason: e.to_string(),
            })
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl PostgresConfig {
    /// Pool acquire timeout
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

impl RaffleConfig {
    /// Backoff policy for lost append races
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.max_conflict_retries)
            .initial_delay(Duration::from_millis(self.retry_initial_delay_ms))
            .max_delay(Duration::from_millis(self.retry_max_delay_ms))
            .build()
    }
}

impl IdentityConfig {
    /// Builds the static resolver from the configured entries.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if an entry is malformed.
    pub fn resolver(&self) -> Result<StaticIdentityResolver, ConfigError> {
        StaticIdentityResolver::parse(&self.tokens).map_err(|e| ConfigError::Invalid {
            key: "RAFFLE_IDENTITIES",
            reason: e.to_string(),
        })
    }
}
