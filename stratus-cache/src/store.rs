//! Remote store abstraction.
//!
//! This trait is the boundary between the cache core and the network
//! key-value store. Implementations are expected to be cheap to share
//! (`Arc`) and safe under concurrent access.

use std::time::Duration;

use async_trait::async_trait;
use stratus_core::CacheResult;

/// Aggregate gauges reported by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreInfo {
    /// Approximate number of keys held by the store.
    pub key_count: u64,
    /// Approximate memory footprint in bytes.
    pub memory_bytes: u64,
}

/// Network key-value store with Redis wire semantics.
///
/// Every method is a suspend point. A returned error always means the
/// operation did not take effect; the cache core maps such errors to
/// degraded behavior rather than surfacing them.
///
/// # Scan Contract
///
/// `scan` is cursor-based: pass cursor 0 to start, and the returned cursor
/// feeds the next call. A returned cursor of 0 means the iteration is
/// complete. The `count` argument is a page-size hint, not a guarantee.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Fetch the bytes stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Write `value` under `key` with the given expiry (SETEX semantics).
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Delete the given keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> CacheResult<u64>;

    /// One page of a cursor scan over keys matching a glob pattern.
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> CacheResult<(u64, Vec<String>)>;

    /// Aggregate store gauges (key count, memory footprint).
    async fn info(&self) -> CacheResult<StoreInfo>;

    /// Connectivity probe.
    async fn ping(&self) -> CacheResult<()>;
}
