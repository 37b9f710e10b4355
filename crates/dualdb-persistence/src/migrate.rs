//! # Schema Migrator
//!
//! Applies versioned migrations to one raw target at startup. Every
//! statement is issued with the read cache bypassed, so a migration never
//! observes or produces cached state even when handed a caching driver.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use dualdb_domain::schema::{CREATE_TODO_NAME_INDEX, CREATE_TODO_TABLE};

use crate::config::Dialect;
use crate::driver::Driver;
use crate::error::{PersistenceError, Result};
use crate::types::{QueryOptions, Value};

/// Bookkeeping table recording applied versions.
pub const MIGRATIONS_TABLE: &str = "schema_migrations";

const CREATE_MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version BIGINT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
)";

const SELECT_APPLIED: &str = "SELECT version FROM schema_migrations ORDER BY version";

// =============================================================================
// MIGRATION
// =============================================================================

/// One schema version: a list of statements, optionally overridden per dialect.
#[derive(Debug, Clone)]
pub struct Migration {
    version: i64,
    name: String,
    statements: Vec<String>,
    overrides: HashMap<Dialect, Vec<String>>,
}

impl Migration {
    pub fn new(version: i64, name: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            statements: Vec::new(),
            overrides: HashMap::new(),
        }
    }

    /// Append a statement applied on every dialect without an override.
    #[must_use]
    pub fn statement(mut self, sql: impl Into<String>) -> Self {
        self.statements.push(sql.into());
        self
    }

    /// Replace the statement list for `dialect`.
    #[must_use]
    pub fn for_dialect<I, S>(mut self, dialect: Dialect, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.overrides
            .insert(dialect, statements.into_iter().map(Into::into).collect());
        self
    }

    pub const fn version(&self) -> i64 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn statements_for(&self, dialect: Dialect) -> &[String] {
        self.overrides
            .get(&dialect)
            .map_or(self.statements.as_slice(), Vec::as_slice)
    }
}

// =============================================================================
// REPORTS
// =============================================================================

/// Result of one migrator run against one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub target: String,
    pub applied: Vec<i64>,
    pub already_applied: usize,
}

/// Applied and pending versions for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub applied: Vec<i64>,
    pub pending: Vec<i64>,
}

impl MigrationStatus {
    pub fn is_current(&self) -> bool {
        self.pending.is_empty()
    }
}

// =============================================================================
// MIGRATOR
// =============================================================================

/// Ordered set of migrations with unique versions.
#[derive(Debug, Clone)]
pub struct SchemaMigrator {
    migrations: Vec<Migration>,
}

impl SchemaMigrator {
    pub fn new(mut migrations: Vec<Migration>) -> Result<Self> {
        migrations.sort_by_key(Migration::version);
        if let Some(pair) = migrations
            .windows(2)
            .find(|pair| pair[0].version == pair[1].version)
        {
            return Err(PersistenceError::Migration {
                version: pair[0].version,
                message: format!(
                    "duplicate version used by '{}' and '{}'",
                    pair[0].name, pair[1].name
                ),
            });
        }
        Ok(Self { migrations })
    }

    /// The schema shipped with this crate.
    pub fn builtin() -> Self {
        Self {
            migrations: vec![
                Migration::new(1, "create_todo").statement(CREATE_TODO_TABLE),
                Migration::new(2, "todo_name_unique").statement(CREATE_TODO_NAME_INDEX),
            ],
        }
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Apply every pending migration in version order.
    ///
    /// Each migration and its bookkeeping row commit together. The first
    /// failure stops the run and is returned as a migration error.
    #[instrument(skip_all, fields(db = %target))]
    pub async fn run(&self, target: &str, driver: &dyn Driver) -> Result<MigrationReport> {
        let applied = self.prepare(driver).await?;
        let dialect = driver.dialect();
        let mut report = MigrationReport {
            target: target.to_string(),
            applied: Vec::new(),
            already_applied: 0,
        };

        for migration in &self.migrations {
            if applied.contains(&migration.version) {
                report.already_applied += 1;
                continue;
            }

            if let Err(e) = apply(driver, dialect, migration).await {
                error!(
                    version = migration.version,
                    name = %migration.name,
                    error = %e,
                    "Migration failed"
                );
                return Err(PersistenceError::Migration {
                    version: migration.version,
                    message: e.to_string(),
                });
            }

            info!(version = migration.version, name = %migration.name, "Migration applied");
            report.applied.push(migration.version);
        }

        Ok(report)
    }

    /// Applied and pending versions without changing the schema, apart from
    /// creating the bookkeeping table.
    pub async fn status(&self, driver: &dyn Driver) -> Result<MigrationStatus> {
        let applied = self.prepare(driver).await?;
        let pending = self
            .migrations
            .iter()
            .map(Migration::version)
            .filter(|v| !applied.contains(v))
            .collect();
        Ok(MigrationStatus {
            applied: applied.into_iter().collect(),
            pending,
        })
    }

    /// Highest applied version, if any.
    pub async fn current_version(&self, driver: &dyn Driver) -> Result<Option<i64>> {
        Ok(self.prepare(driver).await?.last().copied())
    }

    async fn prepare(&self, driver: &dyn Driver) -> Result<BTreeSet<i64>> {
        let opts = QueryOptions::bypass();
        driver
            .execute(CREATE_MIGRATIONS_TABLE, &[], &opts)
            .await
            .map_err(|e| bookkeeping_error(&e))?;

        let rows = driver
            .query(SELECT_APPLIED, &[], &opts)
            .await
            .map_err(|e| bookkeeping_error(&e))?;

        Ok(rows
            .rows
            .iter()
            .filter_map(|row| row.first().and_then(Value::as_i64))
            .collect())
    }
}

fn bookkeeping_error(e: &PersistenceError) -> PersistenceError {
    PersistenceError::Migration {
        version: 0,
        message: format!("{MIGRATIONS_TABLE}: {e}"),
    }
}

async fn apply(driver: &dyn Driver, dialect: Dialect, migration: &Migration) -> Result<()> {
    let mut tx = driver.begin(&QueryOptions::bypass()).await?;

    let mut outcome = Ok(());
    for statement in migration.statements_for(dialect) {
        if let Err(e) = tx.execute(statement, &[]).await {
            outcome = Err(e);
            break;
        }
    }

    if outcome.is_ok() {
        let insert = format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at) VALUES ({}, {}, {})",
            dialect.placeholder(1),
            dialect.placeholder(2),
            dialect.placeholder(3)
        );
        let args = [
            Value::Int(migration.version),
            Value::Text(migration.name.clone()),
            Value::Text(Utc::now().to_rfc3339()),
        ];
        outcome = tx.execute(&insert, &args).await.map(|_| ());
    }

    match outcome {
        Ok(()) => tx.commit().await,
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(version = migration.version, error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}
