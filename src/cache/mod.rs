//! Response cache for catalog reads.
//!
//! Successful responses are stored under a [`CacheKey`] derived from the
//! validated request. Concurrent misses for one key share a single
//! computation; failures reach every waiting caller and are never stored.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! ttl_seconds = 60
//! capacity = 1024
//! shards = 16
//! sweep_interval_seconds = 30
//! ```

mod config;
mod keys;
mod lock;
mod store;

use thiserror::Error;

pub use config::CacheConfig;
pub use keys::CacheKey;
pub use store::{CacheEntry, CachedResponse, ResponseCache, spawn_sweeper};

#[derive(Debug, Clone, Error)]
pub enum CacheError<E> {
    /// The computation ran and failed; every waiter receives the same error.
    #[error(transparent)]
    Compute(E),
    /// The computation ended without producing an outcome (it panicked or
    /// its runtime shut down).
    #[error("computation for cache key {key} was abandoned")]
    Abandoned { key: CacheKey },
}
