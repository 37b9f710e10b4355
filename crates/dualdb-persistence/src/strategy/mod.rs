//! # Strategy Module
//!
//! Enum-dispatched access strategies used by the driver decorators.
//!
//! ## Available Strategies
//!
//! ### Read Strategies
//! - `CacheFirst` - Check cache, fall back to the wrapped driver on miss (default)
//! - `DbOnly` - Skip cache entirely (bypass, or caching disabled)
//!
//! ### Write Strategies
//! - `BestEffort` - Primary is authoritative, secondary failures are logged (default)
//! - `Strict` - Secondary failures are reported after the primary write
//!
//! ## Example
//!
//! ```rust,ignore
//! use dualdb_persistence::strategy::ReadStrategy;
//!
//! let rows = ReadStrategy::for_call(&opts, ttl)
//!     .read(|| cached(key), || inner.query(sql, args, opts), |rows| store(key, rows))
//!     .await?;
//! ```

pub mod read_strategy;
pub mod write_strategy;

pub use read_strategy::ReadStrategy;
pub use write_strategy::{Replicated, WriteStrategy};
