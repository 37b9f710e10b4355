//! # Server Configuration
//!
//! Environment-based configuration. Every key carries the `DUALDB_` prefix;
//! only the primary source is required.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use dualdb_persistence::{
    CacheConfig, DbConfig, PoolConfig, ReplicationConfig, TargetConfig, WriteStrategy,
};

const PREFIX: &str = "DUALDB_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DUALDB_{0} is required")]
    Missing(&'static str),

    #[error("DUALDB_{key}={value} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("DUALDB_DB_MULTI_WRITE is set but DUALDB_DB_SECONDARY_SOURCE is not")]
    MultiWriteWithoutSecondary,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Data-access layer configuration
    pub db: DbConfig,

    /// Redis URL for the shared read cache; the in-process store is used when unset
    pub redis_url: Option<String>,

    /// Logging level, used when `RUST_LOG` is unset
    pub log_level: String,

    /// How long shutdown waits for in-flight calls
    pub shutdown_grace: Duration,

    pub health_interval: Duration,
    pub health_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup. Keys are passed with their
    /// `DUALDB_` prefix.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let driver_name = vars.string("DB_DRIVER_NAME").unwrap_or_else(|| "sqlite".to_string());
        let primary_source = vars
            .string("DB_PRIMARY_SOURCE")
            .ok_or(ConfigError::Missing("DB_PRIMARY_SOURCE"))?;
        let primary = TargetConfig::new(driver_name.as_str(), primary_source)
            .with_debug(vars.parse("DB_PRIMARY_DEBUG", Flag(false))?.0);

        let multi_write = vars.parse("DB_MULTI_WRITE", Flag(false))?.0;
        let secondary = match vars.string("DB_SECONDARY_SOURCE") {
            Some(source) => {
                let driver = vars.string("DB_SECONDARY_DRIVER_NAME").unwrap_or(driver_name);
                let enabled = vars.parse("DB_SECONDARY_ENABLED", Flag(true))?.0;
                Some(
                    TargetConfig::new(driver, source)
                        .with_enabled(enabled && multi_write)
                        .with_debug(vars.parse("DB_SECONDARY_DEBUG", Flag(false))?.0),
                )
            }
            None if multi_write => return Err(ConfigError::MultiWriteWithoutSecondary),
            None => None,
        };

        let defaults = PoolConfig::default();
        let pool = PoolConfig::default()
            .with_max_connections(vars.parse("DB_MAX_CONNECTIONS", defaults.max_connections)?)
            .with_min_connections(vars.parse("DB_MIN_CONNECTIONS", defaults.min_connections)?);

        let db = DbConfig::new(ReplicationConfig::new(primary, secondary))
            .with_cache(CacheConfig::from_secs_signed(
                vars.parse("DB_CACHE_TTL_SECS", 60_i64)?,
            ))
            .with_pool(pool)
            .with_write_strategy(vars.parse("DB_WRITE_STRATEGY", WriteStrategy::default())?)
            .with_run_migrations(vars.parse("DB_RUN_MIGRATIONS", Flag(true))?.0)
            .with_debug(vars.parse("DB_DEBUG", Flag(false))?.0);

        let redis_url = if vars.parse("REDIS_ENABLED", Flag(false))?.0 {
            Some(
                vars.string("REDIS_URL")
                    .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            )
        } else {
            None
        };

        Ok(Self {
            db,
            redis_url,
            log_level: vars.string("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            shutdown_grace: Duration::from_secs(vars.parse("SHUTDOWN_GRACE_PERIOD_SECS", 10)?),
            health_interval: Duration::from_secs(vars.positive("HEALTH_INTERVAL_SECS", 30)?),
            health_timeout: Duration::from_secs(vars.parse("HEALTH_TIMEOUT_SECS", 5)?),
        })
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-blank value for `key`.
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(&format!("{PREFIX}{key}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.string(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn positive(&self, key: &'static str, default: u64) -> Result<u64, ConfigError> {
        match self.parse(key, default)? {
            0 => Err(ConfigError::Invalid {
                key,
                value: self.string(key).unwrap_or_default(),
                reason: "must be greater than zero".to_string(),
            }),
            n => Ok(n),
        }
    }
}

/// Boolean accepting the usual spellings of on and off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Flag(bool);

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Self(true)),
            "0" | "false" | "no" | "off" => Ok(Self(false)),
            other => Err(format!("expected a boolean, got {other}")),
        }
    }
}
