//! # Client Factory
//!
//! Builds the driver chain for a [`DbConfig`] and hands back a [`Client`]
//! that owns it:
//!
//! ```text
//! primary   -> [migrate] -> [StatementLogger] -> CachingDriver --+
//!                                                                 +-> ReplicatedDriver -> [StatementLogger] -> Client
//! secondary -> [migrate] -> [StatementLogger] -> CachingDriver --+
//! ```
//!
//! The client tracks in-flight calls so shutdown can drain them before the
//! connections are closed.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{CachingDriver, MemoryStore, SharedCacheStore};
use crate::config::{DbConfig, Dialect};
use crate::connection::ConnectionFactory;
use crate::driver::{Driver, SharedDriver, Transaction};
use crate::error::{PersistenceError, Result};
use crate::health::{CACHE_STORE, DB_PRIMARY, DB_SECONDARY, HealthTarget};
use crate::logging::StatementLogger;
use crate::migrate::SchemaMigrator;
use crate::replication::ReplicatedDriver;
use crate::types::{ExecResult, QueryOptions, ResultSet, Value};

// =============================================================================
// FACTORY
// =============================================================================

pub struct ClientFactory {
    config: DbConfig,
    connector: ConnectionFactory,
    store: Option<SharedCacheStore>,
    migrator: SchemaMigrator,
}

impl ClientFactory {
    pub fn new(config: DbConfig) -> Self {
        let connector = ConnectionFactory::new(config.pool.clone());
        Self {
            config,
            connector,
            store: None,
            migrator: SchemaMigrator::builtin(),
        }
    }

    /// Share `store` between the caching layers. Defaults to a fresh
    /// in-memory store.
    #[must_use]
    pub fn with_cache_store(mut self, store: SharedCacheStore) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_migrator(mut self, migrator: SchemaMigrator) -> Self {
        self.migrator = migrator;
        self
    }

    #[must_use]
    pub fn with_connection_factory(mut self, connector: ConnectionFactory) -> Self {
        self.connector = connector;
        self
    }

    pub const fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Connect, migrate and assemble. Any failure closes what was opened
    /// and aborts.
    pub async fn build(self) -> Result<Client> {
        let replication = &self.config.replication;

        let primary: SharedDriver =
            Arc::new(self.connector.connect(DB_PRIMARY, replication.primary()).await?);
        if let Err(e) = self.migrate(DB_PRIMARY, primary.as_ref()).await {
            close_quietly(DB_PRIMARY, primary.as_ref()).await;
            return Err(e);
        }

        let secondary = match replication.secondary() {
            Some(target) => {
                let secondary: SharedDriver =
                    match self.connector.connect(DB_SECONDARY, target).await {
                        Ok(driver) => Arc::new(driver),
                        Err(e) => {
                            close_quietly(DB_PRIMARY, primary.as_ref()).await;
                            return Err(e);
                        }
                    };
                if let Err(e) = self.migrate(DB_SECONDARY, secondary.as_ref()).await {
                    close_quietly(DB_SECONDARY, secondary.as_ref()).await;
                    close_quietly(DB_PRIMARY, primary.as_ref()).await;
                    return Err(e);
                }
                Some(secondary)
            }
            None => None,
        };

        Ok(self.assemble(primary, secondary))
    }

    /// Wrap already-open handles into a client without connecting or
    /// migrating.
    pub fn assemble(self, primary: SharedDriver, secondary: Option<SharedDriver>) -> Client {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let ttl = self.config.cache.ttl();
        let replication = &self.config.replication;

        let layer = |name: &str, raw: &SharedDriver, debug: bool| -> SharedDriver {
            let base: SharedDriver = if debug {
                Arc::new(StatementLogger::new(name, Arc::clone(raw)))
            } else {
                Arc::clone(raw)
            };
            Arc::new(CachingDriver::with_store(name, base, Arc::clone(&store), ttl))
        };

        let cached_primary = layer(DB_PRIMARY, &primary, replication.primary().is_debug());
        let cached_secondary = secondary.as_ref().map(|raw| {
            let debug = replication.secondary().is_some_and(|t| t.is_debug());
            layer(DB_SECONDARY, raw, debug)
        });

        let (mut driver, replicated) = match cached_secondary {
            Some(cached_secondary) => {
                let replicated = Arc::new(
                    ReplicatedDriver::new(cached_primary, Some(cached_secondary))
                        .with_strategy(self.config.write_strategy),
                );
                (Arc::clone(&replicated) as SharedDriver, Some(replicated))
            }
            None => (cached_primary, None),
        };

        if self.config.debug {
            driver = Arc::new(StatementLogger::new("client", driver));
        }

        info!(
            multi_write = replicated.is_some(),
            cache_enabled = self.config.cache.is_enabled(),
            cache_store = store.name(),
            ttl_secs = ttl.as_secs(),
            "Database client assembled"
        );

        Client {
            driver,
            replication: replicated,
            primary,
            secondary,
            store,
            shutdown: CancellationToken::new(),
            in_flight: Arc::new(InFlight::default()),
            accepting: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    async fn migrate(&self, name: &str, driver: &dyn Driver) -> Result<()> {
        if !self.config.run_migrations {
            return Ok(());
        }
        let report = self.migrator.run(name, driver).await?;
        info!(
            db = name,
            applied = report.applied.len(),
            already_applied = report.already_applied,
            "Schema up to date"
        );
        Ok(())
    }
}

async fn close_quietly(name: &str, driver: &dyn Driver) {
    if let Err(e) = driver.close().await {
        warn!(db = name, error = %e, "Failed to close connection");
    }
}

// =============================================================================
// IN-FLIGHT TRACKING
// =============================================================================

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> CallGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        CallGuard(Arc::clone(self))
    }

    fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.current() == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct CallGuard(Arc<InFlight>);

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Owner of one driver chain. Share it as `Arc<Client>`; it implements
/// [`Driver`] itself.
pub struct Client {
    driver: SharedDriver,
    replication: Option<Arc<ReplicatedDriver>>,
    primary: SharedDriver,
    secondary: Option<SharedDriver>,
    store: SharedCacheStore,
    shutdown: CancellationToken,
    in_flight: Arc<InFlight>,
    accepting: AtomicBool,
    closed: AtomicBool,
}

impl Client {
    pub fn is_multi_write(&self) -> bool {
        self.secondary.is_some()
    }

    /// Secondary writes that failed after the primary succeeded.
    pub fn replication_failures(&self) -> u64 {
        self.replication
            .as_ref()
            .map_or(0, |r| r.replication_failures())
    }

    pub fn cache_store(&self) -> &SharedCacheStore {
        &self.store
    }

    /// Calls currently running, open transactions included.
    pub fn in_flight(&self) -> usize {
        self.in_flight.current()
    }

    /// Token cancelled when shutdown gives up waiting. Background tasks tied
    /// to this client can select on a child of it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Raw targets and the cache store, named for health reporting.
    pub fn health_targets(&self) -> Vec<(String, HealthTarget)> {
        let mut targets = vec![(
            DB_PRIMARY.to_string(),
            HealthTarget::Driver(Arc::clone(&self.primary)),
        )];
        if let Some(secondary) = &self.secondary {
            targets.push((
                DB_SECONDARY.to_string(),
                HealthTarget::Driver(Arc::clone(secondary)),
            ));
        }
        targets.push((
            CACHE_STORE.to_string(),
            HealthTarget::CacheStore(Arc::clone(&self.store)),
        ));
        targets
    }

    /// Stop accepting calls, give in-flight calls `grace` to finish, cancel
    /// the rest, then close the secondary and the primary.
    pub async fn shutdown(self, grace: Duration) -> Result<()> {
        self.drain_and_close(grace).await
    }

    fn enter(&self) -> Result<CallGuard> {
        let guard = self.in_flight.enter();
        if self.accepting.load(Ordering::SeqCst) {
            Ok(guard)
        } else {
            Err(PersistenceError::ShuttingDown)
        }
    }

    async fn tracked<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _guard = self.enter()?;
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(PersistenceError::Cancelled),
            result = fut => result,
        }
    }

    async fn drain_and_close(&self, grace: Duration) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.accepting.store(false, Ordering::SeqCst);
        info!(
            in_flight = self.in_flight(),
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "Shutting down database client"
        );

        if tokio::time::timeout(grace, self.in_flight.wait_idle())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.in_flight(),
                "Grace period elapsed, cancelling in-flight calls"
            );
            self.shutdown.cancel();
            if tokio::time::timeout(grace, self.in_flight.wait_idle())
                .await
                .is_err()
            {
                warn!(
                    in_flight = self.in_flight(),
                    "Calls still running after cancellation"
                );
            }
        }
        self.shutdown.cancel();

        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.driver.close().await;
        info!("Database client closed");
        result
    }
}

#[async_trait]
impl Driver for Client {
    async fn query(
        &self,
        statement: &str,
        args: &[Value],
        opts: &QueryOptions,
    ) -> Result<ResultSet> {
        self.tracked(self.driver.query(statement, args, opts)).await
    }

    async fn execute(
        &self,
        statement: &str,
        args: &[Value],
        opts: &QueryOptions,
    ) -> Result<ExecResult> {
        self.tracked(self.driver.execute(statement, args, opts)).await
    }

    async fn begin(&self, opts: &QueryOptions) -> Result<Box<dyn Transaction>> {
        let guard = self.enter()?;
        let inner = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(PersistenceError::Cancelled),
            result = self.driver.begin(opts) => result,
        }?;
        Ok(Box::new(TrackedTransaction {
            inner,
            shutdown: self.shutdown.clone(),
            _guard: guard,
        }))
    }

    /// Immediate shutdown: no grace period.
    async fn close(&self) -> Result<()> {
        self.drain_and_close(Duration::ZERO).await
    }

    fn dialect(&self) -> Dialect {
        self.driver.dialect()
    }
}

/// Transaction counted as in flight until committed, rolled back or dropped.
struct TrackedTransaction {
    inner: Box<dyn Transaction>,
    shutdown: CancellationToken,
    _guard: CallGuard,
}

#[async_trait]
impl Transaction for TrackedTransaction {
    async fn query(&mut self, statement: &str, args: &[Value]) -> Result<ResultSet> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(PersistenceError::Cancelled),
            result = self.inner.query(statement, args) => result,
        }
    }

    async fn execute(&mut self, statement: &str, args: &[Value]) -> Result<ExecResult> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(PersistenceError::Cancelled),
            result = self.inner.execute(statement, args) => result,
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self { inner, _guard, .. } = *self;
        inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let Self { inner, _guard, .. } = *self;
        inner.rollback().await
    }
}
