//! Caching layer: cache-key derivation and the key-value stores behind the proxy.
//!
//! The proxy only needs two operations from a store, `get` and
//! `set_with_expiry`, captured by [`CacheStore`]. Expiry is the store's job:
//! nothing in this crate ever deletes an entry.
//!
//! - [`CacheKey`]: canonical, order-independent key for a catalog request.
//! - [`RedisCache`]: production store over a Redis connection manager.
//! - [`MemoryCache`]: in-process store with the same TTL semantics.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod key;
mod memory;
mod redis_store;

pub use key::{CacheKey, canonical_query, normalize_path};
pub use memory::MemoryCache;
pub use redis_store::RedisCache;

/// Errors reported by a cache store.
///
/// The proxy never lets these fail a request; they are logged and recorded
/// as a [`CacheFault`](crate::proxy::CacheFault) instead.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("expiry of {0:?} is out of range for this store")]
    TtlOutOfRange(Duration),
}

/// A remote or local key-value store with per-entry expiry.
///
/// Implementations must be safe to share between concurrent requests and
/// must write entries atomically: a reader sees either the whole value or
/// nothing.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the stored value for `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value` under `key`, replacing any previous entry, expiring after `ttl`.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration)
    -> Result<(), CacheError>;
}
