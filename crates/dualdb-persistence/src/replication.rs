//! # Replicated Write Driver
//!
//! Primary-authoritative fan-out. Reads and transactions use the primary
//! only; writes run on the primary and, once it has succeeded, are replayed
//! on the secondary. How a secondary failure is reported is decided by the
//! [`WriteStrategy`].

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::instrument;

use crate::config::Dialect;
use crate::driver::{Driver, SharedDriver, Transaction, guarded};
use crate::error::{PersistenceError, Result};
use crate::health::DB_SECONDARY;
use crate::strategy::WriteStrategy;
use crate::types::{ExecResult, QueryOptions, ResultSet, Value};

pub struct ReplicatedDriver {
    primary: SharedDriver,
    secondary: Option<SharedDriver>,
    strategy: WriteStrategy,
    failures: AtomicU64,
}

impl ReplicatedDriver {
    /// Without a secondary every call passes straight through to `primary`.
    pub fn new(primary: SharedDriver, secondary: Option<SharedDriver>) -> Self {
        Self {
            primary,
            secondary,
            strategy: WriteStrategy::default(),
            failures: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: WriteStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub const fn is_multi_write(&self) -> bool {
        self.secondary.is_some()
    }

    /// Secondary writes that failed after the primary succeeded.
    pub fn replication_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn primary(&self) -> &SharedDriver {
        &self.primary
    }

    pub fn secondary(&self) -> Option<&SharedDriver> {
        self.secondary.as_ref()
    }
}

/// `opts` with its timeout shrunk to what is left before `deadline`.
fn remaining(opts: &QueryOptions, deadline: Option<Instant>) -> QueryOptions {
    let mut opts = opts.clone();
    if let Some(deadline) = deadline {
        opts.timeout = Some(deadline.saturating_duration_since(Instant::now()));
    }
    opts
}

#[async_trait]
impl Driver for ReplicatedDriver {
    async fn query(
        &self,
        statement: &str,
        args: &[Value],
        opts: &QueryOptions,
    ) -> Result<ResultSet> {
        self.primary.query(statement, args, opts).await
    }

    #[instrument(skip_all, fields(multi_write = self.secondary.is_some()))]
    async fn execute(
        &self,
        statement: &str,
        args: &[Value],
        opts: &QueryOptions,
    ) -> Result<ExecResult> {
        // One deadline for the whole fan-out; the secondary gets what the
        // primary left over.
        let deadline = opts.timeout.map(|limit| Instant::now() + limit);
        let result = self
            .strategy
            .write(
                DB_SECONDARY,
                || guarded(opts, self.primary.execute(statement, args, opts)),
                self.secondary.as_ref().map(|secondary| {
                    move || {
                        let opts = remaining(opts, deadline);
                        async move {
                            guarded(&opts, secondary.execute(statement, args, &opts)).await
                        }
                    }
                }),
            )
            .await;

        match result {
            Ok(replicated) => {
                if replicated.secondary_error.is_some() {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                }
                Ok(replicated.value)
            }
            Err(e @ PersistenceError::Replication { .. }) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn begin(&self, opts: &QueryOptions) -> Result<Box<dyn Transaction>> {
        self.primary.begin(opts).await
    }

    /// Closes the secondary, then the primary. Both are attempted; the first
    /// error is returned.
    async fn close(&self) -> Result<()> {
        let secondary = match &self.secondary {
            Some(secondary) => secondary.close().await,
            None => Ok(()),
        };
        let primary = self.primary.close().await;
        secondary.and(primary)
    }

    fn dialect(&self) -> Dialect {
        self.primary.dialect()
    }
}
