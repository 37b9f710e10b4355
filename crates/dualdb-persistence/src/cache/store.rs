//! Cache store abstraction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Byte-oriented key/value store with per-entry expiry.
///
/// A `get` never returns an entry whose TTL has elapsed. A `put` on an
/// existing key replaces the value and restarts its TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Reachability probe used by health checks.
    async fn ping(&self) -> Result<()>;

    /// Store kind, for logs.
    fn name(&self) -> &'static str;
}

pub type SharedCacheStore = Arc<dyn CacheStore>;
