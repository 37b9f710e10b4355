//! # Driver Contract
//!
//! The capability set every layer of the driver chain implements: the raw
//! SQL driver, the caching decorator, the replication driver, the statement
//! logger and the client itself. Layers compose because each one only sees
//! the layer below it through this trait.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Dialect;
use crate::error::{PersistenceError, Result};
use crate::types::{ExecResult, QueryOptions, ResultSet, Value};

/// A driver layer. Implementations must be safe to share across tasks.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Run a read statement.
    async fn query(&self, statement: &str, args: &[Value], opts: &QueryOptions)
    -> Result<ResultSet>;

    /// Run a mutating statement.
    async fn execute(
        &self,
        statement: &str,
        args: &[Value],
        opts: &QueryOptions,
    ) -> Result<ExecResult>;

    /// Open a transaction on the authoritative target.
    async fn begin(&self, opts: &QueryOptions) -> Result<Box<dyn Transaction>>;

    /// Release underlying resources. Later calls fail with `Closed`.
    async fn close(&self) -> Result<()>;

    fn dialect(&self) -> Dialect;
}

/// An open transaction. Dropping it without commit rolls back.
#[async_trait]
pub trait Transaction: Send {
    async fn query(&mut self, statement: &str, args: &[Value]) -> Result<ResultSet>;

    async fn execute(&mut self, statement: &str, args: &[Value]) -> Result<ExecResult>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

pub type SharedDriver = Arc<dyn Driver>;

#[async_trait]
impl<D: Driver + ?Sized> Driver for Arc<D> {
    async fn query(
        &self,
        statement: &str,
        args: &[Value],
        opts: &QueryOptions,
    ) -> Result<ResultSet> {
        (**self).query(statement, args, opts).await
    }

    async fn execute(
        &self,
        statement: &str,
        args: &[Value],
        opts: &QueryOptions,
    ) -> Result<ExecResult> {
        (**self).execute(statement, args, opts).await
    }

    async fn begin(&self, opts: &QueryOptions) -> Result<Box<dyn Transaction>> {
        (**self).begin(opts).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }

    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }
}

/// Run `fut` under the timeout and cancellation signal carried by `opts`.
///
/// Cancellation wins over completion when both are ready.
pub async fn guarded<T, F>(opts: &QueryOptions, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let bounded = async {
        match opts.timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                PersistenceError::Timeout {
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }
            })?,
            None => fut.await,
        }
    };

    match &opts.cancel {
        Some(token) => {
            tokio::select! {
                biased;
                () = token.cancelled() => Err(PersistenceError::Cancelled),
                result = bounded => result,
            }
        }
        None => bounded.await,
    }
}
