//! # dualdb Persistence Library
//!
//! Driver-level data-access layer: a read-through TTL cache and optional
//! dual-target write replication, both exposed through the same [`Driver`]
//! contract as a plain database connection so callers cannot tell them apart.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Request handlers / repositories                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Client                              │
//! │        (in-flight tracking, graceful shutdown, debug)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ReplicatedDriver                         │
//! │    (reads: primary; writes: primary then best-effort copy)   │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                   │
//!                    ▼                   ▼
//! ┌─────────────────────────┐   ┌──────────────────────────────┐
//! │  CachingDriver (primary) │   │  CachingDriver (secondary)   │
//! └─────────────────────────┘   └──────────────────────────────┘
//!                    │                   │
//!                    ▼                   ▼
//! ┌─────────────────────────┐   ┌──────────────────────────────┐
//! │   SqlDriver (sqlx pool)  │   │   SqlDriver (sqlx pool)      │
//! │   (source of truth)      │   │   (write replica)            │
//! └─────────────────────────┘   └──────────────────────────────┘
//! ```
//!
//! Schema migrations run against the raw `SqlDriver` at startup with the
//! cache bypassed. Health checks probe the raw drivers and the cache store.
//!
//! ## Features
//!
//! - `sqlite`: SQLite driver (default)
//! - `postgres`: PostgreSQL driver (default)
//! - `redis`: Redis cache store (default)
//! - `testing`: scripted `StubDriver` backend for downstream tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dualdb_persistence::{
//!     ClientFactory, DbConfig, Driver, QueryOptions, ReplicationConfig, TargetConfig,
//! };
//!
//! let config = DbConfig::new(ReplicationConfig::new(
//!     TargetConfig::new("sqlite", "todo.db"),
//!     Some(TargetConfig::new("postgres", "postgres://localhost/todo")),
//! ));
//!
//! let client = ClientFactory::new(config).build().await?;
//! let rows = client.query("SELECT id, name FROM todo", &[], &QueryOptions::new()).await?;
//! client.shutdown(Duration::from_secs(10)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod health;
pub mod logging;
pub mod migrate;
pub mod replication;
pub mod repository;
pub mod strategy;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

// Re-export commonly used types
pub use cache::{CacheKey, CacheStore, CachingDriver, MemoryStore, SharedCacheStore};
#[cfg(feature = "redis")]
pub use cache::{RedisConfig, RedisStore};
pub use client::{Client, ClientFactory};
pub use config::{CacheConfig, DbConfig, Dialect, PoolConfig, ReplicationConfig, TargetConfig};
pub use connection::{ConnectionFactory, SqlDriver};
pub use driver::{Driver, SharedDriver, Transaction};
pub use error::{PersistenceError, Result};
pub use health::{HealthCheck, HealthChecker, HealthReport, HealthStatus, HealthTarget};
pub use logging::StatementLogger;
pub use migrate::{Migration, MigrationReport, MigrationStatus, SchemaMigrator};
pub use replication::ReplicatedDriver;
pub use repository::{SqlTodoRepository, TodoRepository};
pub use strategy::{ReadStrategy, WriteStrategy};
pub use types::{ExecResult, QueryOptions, ResultSet, Value};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Connect, migrate and assemble a client with the default in-memory cache.
///
/// # Errors
///
/// Returns an error if a target cannot be reached or a migration fails.
pub async fn connect(config: DbConfig) -> Result<Client> {
    ClientFactory::new(config).build().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
