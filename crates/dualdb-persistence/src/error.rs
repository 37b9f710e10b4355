//! Persistence layer error types

use thiserror::Error;

/// Persistence layer errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Connection error on {target}: {message}")]
    Connection { target: String, message: String },

    #[error("Unsupported dialect: {0}")]
    UnsupportedDialect(String),

    #[error("Migration {version} failed: {message}")]
    Migration { version: i64, message: String },

    #[error("Query error: {0}")]
    Query(String),

    #[error("Exec error: {0}")]
    Exec(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Query timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Cache store error: {0}")]
    Cache(String),

    #[error("Replication to {target} failed: {message}")]
    Replication { target: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid query parameters: {0}")]
    InvalidQuery(String),

    #[error("Entity not found: {entity_type} with key {key}")]
    NotFound { entity_type: String, key: String },

    #[error("Client is shutting down")]
    ShuttingDown,

    #[error("Connection is closed")]
    Closed,
}

impl PersistenceError {
    /// Map a driver error raised by a read statement.
    pub fn query(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => Self::Closed,
            other => Self::Query(other.to_string()),
        }
    }

    /// Map a driver error raised by a mutating statement.
    pub fn exec(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => Self::Closed,
            other => Self::Exec(other.to_string()),
        }
    }

    /// Map a driver error raised while opening or finishing a transaction.
    pub fn transaction(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => Self::Closed,
            other => Self::Transaction(other.to_string()),
        }
    }

    /// Map a driver error raised while establishing a connection.
    pub fn connection(target: &str, err: impl std::fmt::Display) -> Self {
        Self::Connection {
            target: target.to_string(),
            message: err.to_string(),
        }
    }

    /// Errors that abort process startup rather than a single request.
    pub const fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::UnsupportedDialect(_) | Self::Migration { .. }
        )
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<dualdb_domain::DomainError> for PersistenceError {
    fn from(err: dualdb_domain::DomainError) -> Self {
        Self::InvalidQuery(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for PersistenceError {
    fn from(err: redis::RedisError) -> Self {
        Self::Cache(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
