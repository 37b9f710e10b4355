//! Statement logging decorator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use crate::config::Dialect;
use crate::driver::{Driver, SharedDriver, Transaction};
use crate::error::Result;
use crate::types::{ExecResult, QueryOptions, ResultSet, Value};

/// Logs every query and execute at debug level. Results pass through untouched.
pub struct StatementLogger {
    inner: SharedDriver,
    name: String,
    observed: AtomicU64,
}

impl StatementLogger {
    pub fn new(name: impl Into<String>, inner: SharedDriver) -> Self {
        Self {
            inner,
            name: name.into(),
            observed: AtomicU64::new(0),
        }
    }

    /// Statements logged so far.
    pub fn observed(&self) -> u64 {
        self.observed.load(Ordering::Relaxed)
    }

    fn log<T>(
        &self,
        kind: &str,
        statement: &str,
        args: &[Value],
        opts: &QueryOptions,
        started: Instant,
        result: &Result<T>,
    ) {
        self.observed.fetch_add(1, Ordering::Relaxed);
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok(_) => debug!(
                db = %self.name,
                kind,
                statement,
                args = args.len(),
                bypass_cache = opts.bypass_cache,
                elapsed_ms,
                ok = true,
                "driver.{kind}"
            ),
            Err(e) => debug!(
                db = %self.name,
                kind,
                statement,
                args = args.len(),
                bypass_cache = opts.bypass_cache,
                elapsed_ms,
                ok = false,
                error = %e,
                "driver.{kind}"
            ),
        }
    }
}

#[async_trait]
impl Driver for StatementLogger {
    async fn query(
        &self,
        statement: &str,
        args: &[Value],
        opts: &QueryOptions,
    ) -> Result<ResultSet> {
        let started = Instant::now();
        let result = self.inner.query(statement, args, opts).await;
        self.log("query", statement, args, opts, started, &result);
        result
    }

    async fn execute(
        &self,
        statement: &str,
        args: &[Value],
        opts: &QueryOptions,
    ) -> Result<ExecResult> {
        let started = Instant::now();
        let result = self.inner.execute(statement, args, opts).await;
        self.log("execute", statement, args, opts, started, &result);
        result
    }

    async fn begin(&self, opts: &QueryOptions) -> Result<Box<dyn Transaction>> {
        debug!(db = %self.name, "driver.begin");
        self.inner.begin(opts).await
    }

    async fn close(&self) -> Result<()> {
        debug!(db = %self.name, observed = self.observed(), "driver.close");
        self.inner.close().await
    }

    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubDriver, StubFailure};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_results_pass_through() {
        let rows = ResultSet::new(["n"]).with_row(vec![Value::Int(1)]);
        let stub = StubDriver::new().with_result("SELECT 1 AS n", rows.clone());
        let logger = StatementLogger::new("db", Arc::new(stub.clone()));
        let opts = QueryOptions::new();

        assert_eq!(logger.query("SELECT 1 AS n", &[], &opts).await.unwrap(), rows);

        stub.fail_writes(Some(StubFailure::Statement));
        assert!(logger.execute("DELETE FROM todo", &[], &opts).await.is_err());

        assert_eq!(logger.observed(), 2);
        assert_eq!(stub.query_count(), 1);
        assert_eq!(stub.execute_count(), 1);
    }
}
