//! # Caching Decorator
//!
//! Read-through TTL cache wrapping one driver. Reads are answered from the
//! store while an entry is live; writes and transactions always go to the
//! wrapped driver and never touch the store. Entries leave the cache only
//! by expiring.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::Instrument;

use super::key::CacheKey;
use super::memory::MemoryStore;
use super::store::SharedCacheStore;
use crate::config::Dialect;
use crate::driver::{Driver, SharedDriver, Transaction, guarded};
use crate::error::{PersistenceError, Result};
use crate::strategy::ReadStrategy;
use crate::types::{ExecResult, QueryOptions, ResultSet, Value};

/// Longest a single store lookup or populate may take before the read
/// falls back to the wrapped driver.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct CachingDriver {
    inner: SharedDriver,
    store: SharedCacheStore,
    ttl: Duration,
    store_timeout: Duration,
    name: String,
}

impl CachingDriver {
    /// Wrap `inner` with a private in-memory store.
    pub fn new(name: impl Into<String>, inner: SharedDriver, ttl: Duration) -> Self {
        Self::with_store(name, inner, Arc::new(MemoryStore::new()), ttl)
    }

    pub fn with_store(
        name: impl Into<String>,
        inner: SharedDriver,
        store: SharedCacheStore,
        ttl: Duration,
    ) -> Self {
        Self {
            inner,
            store,
            ttl,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn inner(&self) -> &SharedDriver {
        &self.inner
    }
}

/// Store calls that outlive `limit` count as cache failures.
async fn bounded<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        PersistenceError::Cache(format!("store did not answer within {}ms", limit.as_millis()))
    })?
}

async fn lookup(
    store: &SharedCacheStore,
    key: &str,
    limit: Duration,
) -> Result<Option<ResultSet>> {
    match bounded(limit, store.get(key)).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl Driver for CachingDriver {
    async fn query(
        &self,
        statement: &str,
        args: &[Value],
        opts: &QueryOptions,
    ) -> Result<ResultSet> {
        let strategy = ReadStrategy::for_call(opts, self.ttl);
        if strategy == ReadStrategy::DbOnly {
            return self.inner.query(statement, args, opts).await;
        }

        // Namespaced so targets can share one store.
        let key = format!("{}:{}", self.name, CacheKey::new(statement, args));
        let span = tracing::debug_span!("cache_read", db = %self.name, key = %key);
        let key = key.as_str();
        let store = &self.store;
        let ttl = self.ttl;
        let limit = self.store_timeout;

        // The caller's bound covers the store round trips too.
        let read = strategy.read(
            move || lookup(store, key, limit),
            || self.inner.query(statement, args, opts),
            move |rows: &ResultSet| {
                let encoded = serde_json::to_vec(rows);
                async move {
                    match encoded {
                        Ok(bytes) => bounded(limit, store.put(key, bytes, ttl)).await,
                        Err(e) => Err(e.into()),
                    }
                }
            },
        );
        guarded(opts, read).instrument(span).await
    }

    async fn execute(
        &self,
        statement: &str,
        args: &[Value],
        opts: &QueryOptions,
    ) -> Result<ExecResult> {
        self.inner.execute(statement, args, opts).await
    }

    async fn begin(&self, opts: &QueryOptions) -> Result<Box<dyn Transaction>> {
        self.inner.begin(opts).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }
}
