//! # Configuration
//!
//! Immutable configuration for targets, replication, caching and pooling.
//! Values are built once at process start; builder methods consume and
//! return a new value instead of mutating shared state.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{PersistenceError, Result};
use crate::strategy::WriteStrategy;

// =============================================================================
// DIALECT
// =============================================================================

/// SQL dialects the connection factory can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }

    /// Whether the driver for this dialect was compiled in.
    pub const fn is_compiled(self) -> bool {
        match self {
            Self::Sqlite => cfg!(feature = "sqlite"),
            Self::Postgres => cfg!(feature = "postgres"),
        }
    }

    /// Bind placeholder for the `n`th (1-based) argument.
    #[must_use]
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Self::Sqlite => "?".to_string(),
            Self::Postgres => format!("${n}"),
        }
    }

    /// Turn a configured connection string into a driver URL.
    ///
    /// SQLite accepts bare paths (`todo.db`, `:memory:`, `file:ent?mode=memory`);
    /// PostgreSQL requires a URL.
    pub fn connection_url(self, connection_string: &str) -> Result<String> {
        let raw = connection_string.trim();
        if raw.is_empty() {
            return Err(PersistenceError::InvalidQuery(
                "connection string must not be empty".to_string(),
            ));
        }

        if let Some(found) = scheme_dialect(raw) {
            if found != self {
                return Err(PersistenceError::InvalidQuery(format!(
                    "connection string is for {found}, target dialect is {self}"
                )));
            }
            return Ok(raw.to_string());
        }

        match self {
            Self::Sqlite if raw == ":memory:" => Ok("sqlite::memory:".to_string()),
            Self::Sqlite if raw.contains('?') => Ok(format!("sqlite:{raw}")),
            // Create the database file on first open so migrations can run.
            Self::Sqlite => Ok(format!("sqlite:{raw}?mode=rwc")),
            Self::Postgres => Err(PersistenceError::InvalidQuery(
                "postgres connection strings must be URLs (postgres://...)".to_string(),
            )),
        }
    }
}

fn scheme_dialect(raw: &str) -> Option<Dialect> {
    let (scheme, _) = raw.split_once(':')?;
    match scheme.to_ascii_lowercase().as_str() {
        "sqlite" => Some(Dialect::Sqlite),
        "postgres" | "postgresql" => Some(Dialect::Postgres),
        _ => None,
    }
}

impl FromStr for Dialect {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" | "libsql" => Ok(Self::Sqlite),
            "postgres" | "postgresql" | "pgx" => Ok(Self::Postgres),
            other => Err(PersistenceError::UnsupportedDialect(other.to_string())),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// TARGET
// =============================================================================

/// One physical datastore target.
#[derive(Clone, PartialEq, Eq)]
pub struct TargetConfig {
    driver_name: String,
    connection_string: String,
    enabled: bool,
    debug: bool,
}

impl TargetConfig {
    /// Create an enabled target with statement debugging off.
    pub fn new(driver_name: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self {
            driver_name: driver_name.into(),
            connection_string: connection_string.into(),
            enabled: true,
            debug: false,
        }
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub const fn is_debug(&self) -> bool {
        self.debug
    }

    /// Parse the configured driver name.
    pub fn dialect(&self) -> Result<Dialect> {
        self.driver_name.parse()
    }
}

// Connection strings routinely carry credentials.
impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("driver_name", &self.driver_name)
            .field("connection_string", &"<redacted>")
            .field("enabled", &self.enabled)
            .field("debug", &self.debug)
            .finish()
    }
}

// =============================================================================
// REPLICATION
// =============================================================================

/// Primary target plus an optional write replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationConfig {
    primary: TargetConfig,
    secondary: Option<TargetConfig>,
}

impl ReplicationConfig {
    /// A disabled secondary is dropped here, so a secondary exists only
    /// when multi-write is on.
    pub fn new(primary: TargetConfig, secondary: Option<TargetConfig>) -> Self {
        Self {
            primary,
            secondary: secondary.filter(TargetConfig::is_enabled),
        }
    }

    pub const fn single(primary: TargetConfig) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    pub const fn primary(&self) -> &TargetConfig {
        &self.primary
    }

    pub const fn secondary(&self) -> Option<&TargetConfig> {
        self.secondary.as_ref()
    }

    pub const fn multi_write(&self) -> bool {
        self.secondary.is_some()
    }
}

// =============================================================================
// CACHE
// =============================================================================

/// Longest TTL a cache entry may carry; larger values are clamped.
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Read cache configuration. A zero TTL disables caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    ttl: Duration,
}

impl CacheConfig {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: ttl.min(MAX_CACHE_TTL),
        }
    }

    pub const fn disabled() -> Self {
        Self { ttl: Duration::ZERO }
    }

    /// Zero or negative values disable caching.
    pub fn from_secs_signed(secs: i64) -> Self {
        u64::try_from(secs)
            .map(|secs| Self::new(Duration::from_secs(secs)))
            .unwrap_or_else(|_| Self::disabled())
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    pub const fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

// =============================================================================
// POOL
// =============================================================================

/// Connection pool sizing, applied to every target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    #[must_use]
    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

// =============================================================================
// DATA-ACCESS LAYER
// =============================================================================

/// Everything the client factory needs to assemble a client.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub replication: ReplicationConfig,
    pub cache: CacheConfig,
    pub pool: PoolConfig,
    pub write_strategy: WriteStrategy,
    pub run_migrations: bool,
    pub debug: bool,
}

impl DbConfig {
    pub fn new(replication: ReplicationConfig) -> Self {
        Self {
            replication,
            cache: CacheConfig::default(),
            pool: PoolConfig::default(),
            write_strategy: WriteStrategy::default(),
            run_migrations: true,
            debug: false,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    #[must_use]
    pub fn with_write_strategy(mut self, strategy: WriteStrategy) -> Self {
        self.write_strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_aliases() {
        assert_eq!("sqlite3".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert_eq!("libsql".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert_eq!("PGX".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert!(matches!(
            "oracle".parse::<Dialect>(),
            Err(PersistenceError::UnsupportedDialect(name)) if name == "oracle"
        ));
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::Sqlite.placeholder(3), "?");
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
    }

    #[test]
    fn test_connection_url_normalization() {
        assert_eq!(
            Dialect::Sqlite.connection_url(":memory:").unwrap(),
            "sqlite::memory:"
        );
        assert_eq!(
            Dialect::Sqlite.connection_url("todo.db").unwrap(),
            "sqlite:todo.db?mode=rwc"
        );
        assert_eq!(
            Dialect::Sqlite.connection_url("file:ent?mode=memory").unwrap(),
            "sqlite:file:ent?mode=memory"
        );
        assert_eq!(
            Dialect::Postgres
                .connection_url("postgres://u:p@localhost/todo")
                .unwrap(),
            "postgres://u:p@localhost/todo"
        );
        assert!(Dialect::Postgres.connection_url("host=localhost").is_err());
        assert!(Dialect::Sqlite.connection_url("postgres://localhost").is_err());
        assert!(Dialect::Sqlite.connection_url("  ").is_err());
    }

    #[test]
    fn test_disabled_secondary_is_dropped() {
        let primary = TargetConfig::new("sqlite", ":memory:");
        let secondary = TargetConfig::new("sqlite", "replica.db").with_enabled(false);

        let config = ReplicationConfig::new(primary.clone(), Some(secondary));
        assert!(!config.multi_write());
        assert!(config.secondary().is_none());

        let config = ReplicationConfig::new(primary, Some(TargetConfig::new("sqlite", "r.db")));
        assert!(config.multi_write());
    }

    #[test]
    fn test_cache_ttl_signed() {
        assert!(!CacheConfig::from_secs_signed(-1).is_enabled());
        assert!(!CacheConfig::from_secs_signed(0).is_enabled());
        assert_eq!(
            CacheConfig::from_secs_signed(5).ttl(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_huge_ttl_is_clamped() {
        assert_eq!(CacheConfig::from_secs_signed(i64::MAX).ttl(), MAX_CACHE_TTL);
        assert_eq!(CacheConfig::new(Duration::MAX).ttl(), MAX_CACHE_TTL);
    }

    #[test]
    fn test_target_debug_redacts_connection_string() {
        let target = TargetConfig::new("postgres", "postgres://admin:hunter2@db/todo");
        let rendered = format!("{target:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
