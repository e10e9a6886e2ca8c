//! Coalescing cache core over a remote key-value store.
//!
//! This crate implements a stampede-protected read/write cache in front of
//! a remote key-value store with Redis wire semantics.
//!
//! # Design Philosophy
//!
//! A cache outage must never amplify load. Every store operation degrades
//! to "miss" or "write failed" rather than propagating, and when the store
//! is unreachable every public operation short-circuits to a no-op so the
//! cache never adds pressure to an outage. Concurrent misses for the same
//! key coalesce onto one in-flight populate call; its outcome is shared by
//! every waiter.
//!
//! # Example
//!
//! ```ignore
//! let store = RedisStore::connect("redis://127.0.0.1/", &config).await;
//! let cache: CoalescingCache<UserRow, _> = CoalescingCache::new(Arc::new(store), config)?;
//!
//! let user = cache
//!     .get_or_populate("user:42", || async { load_user(42).await }, None)
//!     .await?;
//! ```

pub mod cache;
pub mod codec;
pub mod janitor;
pub mod key;
pub mod lock;
pub mod memory_store;
pub mod redis_store;
pub mod stats;
pub mod store;
pub mod ttl;

pub use cache::CoalescingCache;
pub use codec::{ValueCodec, COMPRESSION_MARKER};
pub use janitor::{lock_janitor_task, JanitorConfig, JanitorMetrics, JanitorSnapshot};
pub use key::KeyBuilder;
pub use lock::{share_outcome, JoinOutcome, LockRegistry, SharedOutcome};
pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use stats::{CacheStats, OpLatency, PerformanceTracker};
pub use store::{RemoteStore, StoreInfo};
pub use ttl::TtlPolicy;
