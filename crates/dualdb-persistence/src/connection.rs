//! # Connection Factory
//!
//! Opens one pooled connection per configured target and wraps it in
//! [`SqlDriver`], the bottom layer of every driver chain.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyQueryResult, AnyRow};
use sqlx::{Any, AnyPool, Column, Row, ValueRef};
use tracing::{debug, info, instrument};

use crate::config::{Dialect, PoolConfig, TargetConfig};
use crate::driver::{Driver, Transaction, guarded};
use crate::error::{PersistenceError, Result};
use crate::types::{ExecResult, QueryOptions, ResultSet, Value};

/// Statement used to prove a freshly opened pool can reach its datastore.
const PROBE: &str = "SELECT 1";

/// Opens physical connections from target configuration.
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    pool: PoolConfig,
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl ConnectionFactory {
    pub fn new(pool: PoolConfig) -> Self {
        sqlx::any::install_default_drivers();
        Self { pool }
    }

    /// Open a pool for `target` and verify it answers a probe.
    ///
    /// `name` labels the connection in logs and errors (`db_primary`,
    /// `db_secondary`).
    #[instrument(skip(self, target), fields(db = %name, driver = %target.driver_name()))]
    pub async fn connect(&self, name: &str, target: &TargetConfig) -> Result<SqlDriver> {
        if !target.is_enabled() {
            return Err(PersistenceError::connection(name, "target is disabled"));
        }

        let dialect = target.dialect()?;
        if !dialect.is_compiled() {
            return Err(PersistenceError::UnsupportedDialect(format!(
                "{dialect} (driver not compiled in)"
            )));
        }

        let url = dialect
            .connection_url(target.connection_string())
            .map_err(|e| PersistenceError::connection(name, e))?;
        let started = Instant::now();

        let pool = AnyPoolOptions::new()
            .max_connections(self.pool.max_connections)
            .min_connections(self.pool.min_connections)
            .acquire_timeout(self.pool.acquire_timeout)
            .idle_timeout(self.pool.idle_timeout)
            .connect(&url)
            .await
            .map_err(|e| PersistenceError::connection(name, e))?;

        if let Err(e) = sqlx::query(PROBE).execute(&pool).await {
            pool.close().await;
            return Err(PersistenceError::connection(name, e));
        }

        info!(
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            max_connections = self.pool.max_connections,
            "Database connection established"
        );

        Ok(SqlDriver {
            pool,
            name: name.to_string(),
            dialect,
        })
    }
}

// =============================================================================
// SQL DRIVER
// =============================================================================

/// A pooled connection to one physical target.
#[derive(Debug, Clone)]
pub struct SqlDriver {
    pool: AnyPool,
    name: String,
    dialect: Dialect,
}

impl SqlDriver {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.pool.is_closed() {
            Err(PersistenceError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Driver for SqlDriver {
    async fn query(
        &self,
        statement: &str,
        args: &[Value],
        opts: &QueryOptions,
    ) -> Result<ResultSet> {
        self.ensure_open()?;
        guarded(opts, async {
            let rows = bind_all(sqlx::query(statement), args)
                .fetch_all(&self.pool)
                .await
                .map_err(PersistenceError::query)?;
            Ok(to_result_set(&rows))
        })
        .await
    }

    async fn execute(
        &self,
        statement: &str,
        args: &[Value],
        opts: &QueryOptions,
    ) -> Result<ExecResult> {
        self.ensure_open()?;
        guarded(opts, async {
            let done = bind_all(sqlx::query(statement), args)
                .execute(&self.pool)
                .await
                .map_err(PersistenceError::exec)?;
            Ok(to_exec_result(&done))
        })
        .await
    }

    async fn begin(&self, opts: &QueryOptions) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;
        let inner = guarded(opts, async {
            self.pool.begin().await.map_err(PersistenceError::transaction)
        })
        .await?;
        Ok(Box::new(SqlTransaction { inner }))
    }

    async fn close(&self) -> Result<()> {
        if !self.pool.is_closed() {
            self.pool.close().await;
            debug!(db = %self.name, "Connection pool closed");
        }
        Ok(())
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }
}

/// Transaction pinned to one pooled connection.
pub struct SqlTransaction {
    inner: sqlx::Transaction<'static, Any>,
}

#[async_trait]
impl Transaction for SqlTransaction {
    async fn query(&mut self, statement: &str, args: &[Value]) -> Result<ResultSet> {
        let rows = bind_all(sqlx::query(statement), args)
            .fetch_all(&mut *self.inner)
            .await
            .map_err(PersistenceError::query)?;
        Ok(to_result_set(&rows))
    }

    async fn execute(&mut self, statement: &str, args: &[Value]) -> Result<ExecResult> {
        let done = bind_all(sqlx::query(statement), args)
            .execute(&mut *self.inner)
            .await
            .map_err(PersistenceError::exec)?;
        Ok(to_exec_result(&done))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner
            .commit()
            .await
            .map_err(PersistenceError::transaction)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner
            .rollback()
            .await
            .map_err(PersistenceError::transaction)
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

type AnyQuery<'q> = sqlx::query::Query<'q, Any, sqlx::any::AnyArguments<'q>>;

fn bind_all<'q>(query: AnyQuery<'q>, args: &[Value]) -> AnyQuery<'q> {
    args.iter().fold(query, |query, arg| match arg {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
        Value::Bytes(b) => query.bind(b.clone()),
    })
}

fn to_exec_result(done: &AnyQueryResult) -> ExecResult {
    ExecResult {
        rows_affected: done.rows_affected(),
        last_insert_id: done.last_insert_id(),
    }
}

fn to_result_set(rows: &[AnyRow]) -> ResultSet {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|idx| decode_value(row, idx)).collect())
        .collect();

    ResultSet { columns, rows }
}

fn decode_value(row: &AnyRow, idx: usize) -> Value {
    if row.try_get_raw(idx).map_or(true, |raw| raw.is_null()) {
        return Value::Null;
    }
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Value::Int(v);
    }
    if let Ok(v) = row.try_get::<i32, _>(idx) {
        return Value::Int(i64::from(v));
    }
    if let Ok(v) = row.try_get::<i16, _>(idx) {
        return Value::Int(i64::from(v));
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Value::Float(v);
    }
    if let Ok(v) = row.try_get::<f32, _>(idx) {
        return Value::Float(f64::from(v));
    }
    if let Ok(v) = row.try_get::<bool, _>(idx) {
        return Value::Bool(v);
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return Value::Text(v);
    }
    row.try_get::<Vec<u8>, _>(idx)
        .map_or(Value::Null, Value::Bytes)
}
