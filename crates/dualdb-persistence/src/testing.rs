//! # Test Support
//!
//! [`StubDriver`] is a scripted, call-counting driver for exercising the
//! decorators without a database. Clones share state, so a test can keep a
//! handle for assertions after moving one into a driver chain.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::Dialect;
use crate::driver::{Driver, Transaction, guarded};
use crate::error::{PersistenceError, Result};
use crate::types::{ExecResult, QueryOptions, ResultSet, Value};

/// How a stub call should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubFailure {
    /// The target is unreachable
    Connection,
    /// The statement itself is rejected
    Statement,
}

/// A statement observed by the stub.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub statement: String,
    pub args: Vec<Value>,
}

#[derive(Default)]
struct StubInner {
    name: Mutex<String>,
    dialect: Mutex<Option<Dialect>>,
    results: Mutex<HashMap<String, ResultSet>>,
    rows_affected: Mutex<HashMap<String, u64>>,
    latency: Mutex<Option<Duration>>,
    query_failure: Mutex<Option<StubFailure>>,
    execute_failure: Mutex<Option<StubFailure>>,
    queried: Mutex<Vec<RecordedCall>>,
    executed: Mutex<Vec<RecordedCall>>,
    close_log: Mutex<Option<Arc<Mutex<Vec<String>>>>>,
    queries: AtomicUsize,
    executes: AtomicUsize,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    closes: AtomicUsize,
    closed: AtomicBool,
}

impl StubInner {
    fn name(&self) -> String {
        self.name.lock().clone()
    }

    fn failure(
        &self,
        failure: Option<StubFailure>,
        statement_error: fn(String) -> PersistenceError,
    ) -> Result<()> {
        match failure {
            None => Ok(()),
            Some(StubFailure::Connection) => {
                Err(PersistenceError::connection(&self.name(), "connection refused"))
            }
            Some(StubFailure::Statement) => Err(statement_error(format!(
                "{} rejected the statement",
                self.name()
            ))),
        }
    }

    fn result_for(&self, statement: &str) -> ResultSet {
        self.results
            .lock()
            .get(statement.trim())
            .cloned()
            .unwrap_or_default()
    }

    fn exec_result_for(&self, statement: &str) -> ExecResult {
        ExecResult {
            rows_affected: self
                .rows_affected
                .lock()
                .get(statement.trim())
                .copied()
                .unwrap_or(1),
            last_insert_id: None,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(PersistenceError::Closed)
        } else {
            Ok(())
        }
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

/// Scripted in-memory driver.
#[derive(Clone, Default)]
pub struct StubDriver {
    inner: Arc<StubInner>,
}

impl StubDriver {
    pub fn new() -> Self {
        Self::default().with_name("stub")
    }

    /// Name used in connection errors and the close log.
    #[must_use]
    pub fn with_name(self, name: impl Into<String>) -> Self {
        *self.inner.name.lock() = name.into();
        self
    }

    #[must_use]
    pub fn with_dialect(self, dialect: Dialect) -> Self {
        *self.inner.dialect.lock() = Some(dialect);
        self
    }

    /// Answer `statement` with `rows`.
    #[must_use]
    pub fn with_result(self, statement: &str, rows: ResultSet) -> Self {
        self.set_result(statement, rows);
        self
    }

    /// Report `rows` affected for `statement` (default 1).
    #[must_use]
    pub fn with_rows_affected(self, statement: &str, rows: u64) -> Self {
        self.inner
            .rows_affected
            .lock()
            .insert(statement.trim().to_string(), rows);
        self
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.inner.latency.lock() = Some(latency);
        self
    }

    /// Append this stub's name to `log` when it is closed.
    #[must_use]
    pub fn with_close_log(self, log: Arc<Mutex<Vec<String>>>) -> Self {
        *self.inner.close_log.lock() = Some(log);
        self
    }

    pub fn set_result(&self, statement: &str, rows: ResultSet) {
        self.inner
            .results
            .lock()
            .insert(statement.trim().to_string(), rows);
    }

    pub fn fail_queries(&self, failure: Option<StubFailure>) {
        *self.inner.query_failure.lock() = failure;
    }

    pub fn fail_writes(&self, failure: Option<StubFailure>) {
        *self.inner.execute_failure.lock() = failure;
    }

    pub fn query_count(&self) -> usize {
        self.inner.queries.load(Ordering::SeqCst)
    }

    pub fn execute_count(&self) -> usize {
        self.inner.executes.load(Ordering::SeqCst)
    }

    pub fn begin_count(&self) -> usize {
        self.inner.begins.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.inner.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> usize {
        self.inner.rollbacks.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    /// Read statements that reached the stub, in order.
    pub fn queried(&self) -> Vec<RecordedCall> {
        self.inner.queried.lock().clone()
    }

    /// Writes that took effect, in order. Transactional writes appear on commit.
    pub fn executed(&self) -> Vec<RecordedCall> {
        self.inner.executed.lock().clone()
    }
}

fn record(statement: &str, args: &[Value]) -> RecordedCall {
    RecordedCall {
        statement: statement.trim().to_string(),
        args: args.to_vec(),
    }
}

#[async_trait]
impl Driver for StubDriver {
    async fn query(
        &self,
        statement: &str,
        args: &[Value],
        opts: &QueryOptions,
    ) -> Result<ResultSet> {
        let inner = &self.inner;
        inner.queries.fetch_add(1, Ordering::SeqCst);
        inner.ensure_open()?;
        guarded(opts, async {
            inner.delay().await;
            let failure = *inner.query_failure.lock();
            inner.failure(failure, PersistenceError::Query)?;
            inner.queried.lock().push(record(statement, args));
            Ok(inner.result_for(statement))
        })
        .await
    }

    async fn execute(
        &self,
        statement: &str,
        args: &[Value],
        opts: &QueryOptions,
    ) -> Result<ExecResult> {
        let inner = &self.inner;
        inner.executes.fetch_add(1, Ordering::SeqCst);
        inner.ensure_open()?;
        guarded(opts, async {
            inner.delay().await;
            let failure = *inner.execute_failure.lock();
            inner.failure(failure, PersistenceError::Exec)?;
            inner.executed.lock().push(record(statement, args));
            Ok(inner.exec_result_for(statement))
        })
        .await
    }

    async fn begin(&self, opts: &QueryOptions) -> Result<Box<dyn Transaction>> {
        let inner = &self.inner;
        inner.begins.fetch_add(1, Ordering::SeqCst);
        inner.ensure_open()?;
        guarded(opts, async {
            inner.delay().await;
            if *inner.execute_failure.lock() == Some(StubFailure::Connection) {
                return Err(PersistenceError::connection(&inner.name(), "connection refused"));
            }
            Ok(())
        })
        .await?;

        Ok(Box::new(StubTransaction {
            inner: Arc::clone(inner),
            pending: Vec::new(),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.closed.store(true, Ordering::SeqCst);
        let log = self.inner.close_log.lock().clone();
        if let Some(log) = log {
            log.lock().push(self.inner.name());
        }
        Ok(())
    }

    fn dialect(&self) -> Dialect {
        let dialect = *self.inner.dialect.lock();
        dialect.unwrap_or(Dialect::Sqlite)
    }
}

/// Transaction over a [`StubDriver`]. Writes become visible on commit.
pub struct StubTransaction {
    inner: Arc<StubInner>,
    pending: Vec<RecordedCall>,
}

#[async_trait]
impl Transaction for StubTransaction {
    async fn query(&mut self, statement: &str, args: &[Value]) -> Result<ResultSet> {
        self.inner.queries.fetch_add(1, Ordering::SeqCst);
        let failure = *self.inner.query_failure.lock();
        self.inner.failure(failure, PersistenceError::Query)?;
        self.inner.queried.lock().push(record(statement, args));
        Ok(self.inner.result_for(statement))
    }

    async fn execute(&mut self, statement: &str, args: &[Value]) -> Result<ExecResult> {
        self.inner.executes.fetch_add(1, Ordering::SeqCst);
        let failure = *self.inner.execute_failure.lock();
        self.inner.failure(failure, PersistenceError::Exec)?;
        self.pending.push(record(statement, args));
        Ok(self.inner.exec_result_for(statement))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.executed.lock().extend(self.pending);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_results_and_counts() {
        let stub = StubDriver::new().with_result("SELECT 1", ResultSet::new(["one"]).with_row(vec![Value::Int(1)]));
        let opts = QueryOptions::new();

        let rows = stub.query(" SELECT 1 ", &[], &opts).await.unwrap();
        assert_eq!(rows.value(0, "one"), Some(&Value::Int(1)));
        assert!(stub.query("SELECT 2", &[], &opts).await.unwrap().is_empty());
        assert_eq!(stub.query_count(), 2);
    }

    #[tokio::test]
    async fn test_transaction_writes_visible_on_commit() {
        let stub = StubDriver::new();
        let opts = QueryOptions::new();

        let mut tx = stub.begin(&opts).await.unwrap();
        tx.execute("INSERT INTO t VALUES (?)", &[Value::Int(1)]).await.unwrap();
        assert!(stub.executed().is_empty());
        tx.commit().await.unwrap();
        assert_eq!(stub.executed().len(), 1);

        let mut tx = stub.begin(&opts).await.unwrap();
        tx.execute("INSERT INTO t VALUES (?)", &[Value::Int(2)]).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(stub.executed().len(), 1);
        assert_eq!(stub.rollback_count(), 1);
    }

    #[tokio::test]
    async fn test_failures_and_close() {
        let stub = StubDriver::new().with_name("db_secondary");
        let opts = QueryOptions::new();

        stub.fail_writes(Some(StubFailure::Connection));
        let err = stub.execute("DELETE FROM t", &[], &opts).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Connection { target, .. } if target == "db_secondary"));

        stub.close().await.unwrap();
        let err = stub.query("SELECT 1", &[], &opts).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Closed));
        assert_eq!(stub.close_count(), 1);
    }
}
