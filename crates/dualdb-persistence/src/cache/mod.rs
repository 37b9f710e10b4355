//! # Cache Module
//!
//! Read-through TTL caching for the driver chain: the [`CachingDriver`]
//! decorator, the [`CacheKey`] derivation, and the pluggable stores it
//! writes to (in-process memory by default, Redis behind the `redis`
//! feature).

pub mod decorator;
pub mod key;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod store;

pub use decorator::CachingDriver;
pub use key::CacheKey;
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::{RedisConfig, RedisStore};
pub use store::{CacheStore, SharedCacheStore};
