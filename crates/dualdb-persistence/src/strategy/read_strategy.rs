//! Read strategy implementations using enum dispatch.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;
use crate::types::QueryOptions;

/// Read strategy enum - determines cache/db access pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadStrategy {
    /// Check cache first, fall back to the wrapped driver on miss
    #[default]
    CacheFirst,
    /// Only read from the wrapped driver, skip cache
    DbOnly,
}

impl ReadStrategy {
    /// Pick the strategy for one call.
    pub const fn for_call(opts: &QueryOptions, ttl: Duration) -> Self {
        if opts.bypass_cache || ttl.is_zero() {
            Self::DbOnly
        } else {
            Self::CacheFirst
        }
    }

    /// Execute a read operation according to the strategy.
    ///
    /// - `cache_fn`: looks the value up in the cache store
    /// - `db_fn`: reads through the wrapped driver
    /// - `populate_fn`: stores a successful driver result
    ///
    /// Cache lookup and populate failures are logged and never returned.
    /// Driver failures are returned unchanged and nothing is cached.
    pub async fn read<T, CacheFut, DbFut, PopulateFut>(
        self,
        cache_fn: impl FnOnce() -> CacheFut,
        db_fn: impl FnOnce() -> DbFut,
        populate_fn: impl FnOnce(&T) -> PopulateFut,
    ) -> Result<T>
    where
        CacheFut: Future<Output = Result<Option<T>>>,
        DbFut: Future<Output = Result<T>>,
        PopulateFut: Future<Output = Result<()>>,
    {
        match self {
            Self::CacheFirst => {
                match cache_fn().await {
                    Ok(Some(value)) => {
                        tracing::debug!("Cache hit");
                        return Ok(value);
                    }
                    Ok(None) => {
                        tracing::debug!("Cache miss, falling back to DB");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Cache degraded, falling back to DB");
                    }
                }

                let value = db_fn().await?;

                if let Err(e) = populate_fn(&value).await {
                    tracing::warn!(error = %e, "Cache degraded, failed to populate");
                }

                Ok(value)
            }

            Self::DbOnly => db_fn().await,
        }
    }
}
