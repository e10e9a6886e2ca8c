//! Coalescing cache core.
//!
//! The cache routes every read and write through four small collaborators:
//! the [`KeyBuilder`] for namespacing, the [`ValueCodec`] for serialization
//! and opportunistic compression, the [`TtlPolicy`] for jittered expiry,
//! and the [`LockRegistry`] for request coalescing.
//!
//! # Failure Semantics
//!
//! Store failures never propagate: `get` degrades to a miss, `set` to a
//! failed write, scans stop early at their bounds. When the store is
//! unreachable every operation short-circuits against the availability
//! flag — a deliberate backpressure valve so the cache never amplifies an
//! outage into additional load against itself. Reconnect probing after a
//! failure is single-flighted.
//!
//! Caller-logic failures do propagate: malformed arguments surface as
//! validation errors, and a failed populate call reaches the caller set
//! awaiting it (and is never cached).

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Serialize};
use stratus_core::{CacheConfig, CacheResult};

use crate::codec::ValueCodec;
use crate::key::KeyBuilder;
use crate::lock::{share_outcome, JoinOutcome, LockRegistry, SharedOutcome};
use crate::stats::{CacheStats, PerformanceTracker};
use crate::store::{RemoteStore, StoreInfo};
use crate::ttl::TtlPolicy;

/// Stampede-protected cache over a remote key-value store.
///
/// Each instance carries its own value type `T`, configuration, and lock
/// registry; there is no hidden global state. Instances are cheap to clone
/// and share one registry, so coalescing spans every clone.
pub struct CoalescingCache<T, S>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: RemoteStore,
{
    store: Arc<S>,
    keys: KeyBuilder,
    codec: ValueCodec,
    ttl: TtlPolicy,
    locks: Arc<LockRegistry<T>>,
    tracker: Arc<PerformanceTracker>,
    available: Arc<AtomicBool>,
    reprobing: Arc<AtomicBool>,
    config: CacheConfig,
}

impl<T, S> CoalescingCache<T, S>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: RemoteStore,
{
    /// Create a cache over an already-connected store.
    ///
    /// The config is validated up front; availability starts true and is
    /// managed by the failure path afterwards.
    pub fn new(store: Arc<S>, config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self {
            keys: KeyBuilder::new(config.key_prefix.clone()),
            codec: ValueCodec::new(config.compression_threshold),
            ttl: TtlPolicy::new(config.jitter_enabled, config.jitter_percent),
            locks: Arc::new(LockRegistry::new()),
            tracker: Arc::new(PerformanceTracker::new()),
            available: Arc::new(AtomicBool::new(true)),
            reprobing: Arc::new(AtomicBool::new(false)),
            store,
            config,
        })
    }

    /// Create a cache, probing connectivity with bounded exponential
    /// backoff first.
    ///
    /// If every attempt fails the cache still constructs — in unavailable
    /// state — so consumers keep their direct-fetch fallback instead of
    /// failing outright.
    pub async fn connect(store: Arc<S>, config: CacheConfig) -> CacheResult<Self> {
        let cache = Self::new(store, config)?;

        let mut backoff = cache.config.connect_backoff;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match cache.store.ping().await {
                Ok(()) => break,
                Err(e) if attempt >= cache.config.connect_retries => {
                    tracing::warn!(
                        error = %e,
                        attempts = attempt,
                        "Store unreachable at startup; cache starts unavailable"
                    );
                    cache.available.store(false, Ordering::SeqCst);
                    break;
                }
                Err(e) => {
                    tracing::debug!(error = %e, attempt, "Store ping failed, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }

        Ok(cache)
    }

    /// Whether the store is currently considered reachable.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// The lock registry backing this cache, for janitor wiring.
    pub fn lock_registry(&self) -> Arc<LockRegistry<T>> {
        Arc::clone(&self.locks)
    }

    /// The cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Mark the store unreachable and kick off a single-flighted reprobe.
    fn note_failure(&self) {
        let was_available = self.available.swap(false, Ordering::SeqCst);
        if was_available {
            tracing::warn!("Store marked unavailable; operations degrade to no-ops");
        }

        if self.reprobing.swap(true, Ordering::SeqCst) {
            return; // a probe loop is already running
        }

        let store = Arc::clone(&self.store);
        let available = Arc::clone(&self.available);
        let reprobing = Arc::clone(&self.reprobing);
        let mut backoff = self.config.connect_backoff;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(backoff).await;
                match store.ping().await {
                    Ok(()) => {
                        available.store(true, Ordering::SeqCst);
                        reprobing.store(false, Ordering::SeqCst);
                        tracing::info!("Store reachable again; cache available");
                        return;
                    }
                    Err(_) => {
                        backoff = backoff.saturating_mul(2).min(Duration::from_secs(30));
                    }
                }
            }
        });
    }

    /// Get a value, deserializing transparently.
    ///
    /// Returns `None` — never an error — on miss, store failure, or a
    /// payload that fails to decode.
    pub async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        let store_key = self.keys.build(key)?;
        if !self.is_available() {
            return Ok(None);
        }

        let started = Instant::now();
        let found = match self.store.get(&store_key).await {
            Ok(Some(bytes)) => match self.codec.decode(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(error = %e, key = %store_key, "Cached payload failed to decode, treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, key = %store_key, "Store get failed, treating as miss");
                self.note_failure();
                None
            }
        };
        self.tracker.record("get", started.elapsed());
        Ok(found)
    }

    /// Write a value with a jittered TTL.
    ///
    /// Returns false — never an error — when the write did not land; the
    /// caller may retry.
    pub async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<bool> {
        let store_key = self.keys.build(key)?;
        if !self.is_available() {
            return Ok(false);
        }

        let started = Instant::now();
        let bytes = match self.codec.encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, key = %store_key, "Value failed to encode, skipping write");
                return Ok(false);
            }
        };

        let effective = self.ttl.effective_ttl(ttl.unwrap_or(self.config.default_ttl));
        let written = match self.store.set_ex(&store_key, &bytes, effective).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, key = %store_key, "Store write failed");
                self.note_failure();
                false
            }
        };
        self.tracker.record("set", started.elapsed());
        Ok(written)
    }

    /// Get a value, or populate it with stampede protection.
    ///
    /// For any key at most one populate call is in flight at a time; every
    /// concurrent caller for the same key awaits that call's outcome. A
    /// failed populate is propagated to its waiters and never cached; the
    /// waiters then re-enter once, and exactly one of them becomes the new
    /// leader while the rest join its lock.
    ///
    /// When the store is unavailable this degrades to invoking `populate`
    /// directly — the consuming feature keeps working off its direct path.
    pub async fn get_or_populate<F, Fut>(
        &self,
        key: &str,
        populate: F,
        ttl: Option<Duration>,
    ) -> CacheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        let store_key = self.keys.build(key)?;
        if !self.is_available() {
            return populate().await;
        }

        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        // Built but not yet polled: it only starts executing if this caller
        // wins leadership for the key.
        let candidate = share_outcome(populate());
        let mut healed = false;

        loop {
            match self.locks.join_or_lead(&store_key, &candidate) {
                JoinOutcome::Leader => {
                    let started = Instant::now();
                    let outcome = candidate.clone().await;
                    self.tracker.record("populate", started.elapsed());

                    match outcome {
                        Ok(value) => {
                            if !self.set(key, &value, ttl).await.unwrap_or(false) {
                                tracing::debug!(key = %store_key, "Populated value not cached");
                            }
                            self.release_after_grace(store_key, candidate);
                            return Ok(value);
                        }
                        Err(e) => {
                            // Prompt release so a retry is not starved. The
                            // identity check keeps a late-running leader from
                            // deleting a successor's lock after a janitor
                            // reclaim.
                            self.locks.remove_if(&store_key, &candidate);
                            return Err(e);
                        }
                    }
                }
                JoinOutcome::Waiter(shared) => match shared.clone().await {
                    Ok(value) => return Ok(value),
                    Err(e) if healed => return Err(e),
                    Err(_) => {
                        // Self-healing after a failed leader: purge the
                        // failed lock before re-entering, otherwise a waiter
                        // waking ahead of the leader's own release would
                        // re-join the stale failure. Then loop back so one
                        // waiter (whoever wins the registry race) re-invokes
                        // populate while the rest join it.
                        self.locks.remove_if(&store_key, &shared);
                        healed = true;
                    }
                },
            }
        }
    }

    /// Schedule lock removal after the grace window, which absorbs callers
    /// that missed just before the populated value became readable. Removal
    /// is identity-checked so a delayed grace task cannot delete a
    /// successor lock installed after a janitor reclaim.
    fn release_after_grace(&self, store_key: String, shared: SharedOutcome<T>) {
        let locks = Arc::clone(&self.locks);
        let grace = self.config.lock_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            locks.remove_if(&store_key, &shared);
        });
    }

    /// Delete the given logical keys, returning how many existed.
    pub async fn delete(&self, keys: &[&str]) -> CacheResult<u64> {
        let store_keys: Vec<String> = keys
            .iter()
            .map(|k| self.keys.build(k))
            .collect::<CacheResult<_>>()?;
        if !self.is_available() || store_keys.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let removed = match self.store.delete(&store_keys).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Store delete failed");
                self.note_failure();
                0
            }
        };
        self.tracker.record("delete", started.elapsed());
        Ok(removed)
    }

    /// Delete every key matching a glob pattern.
    ///
    /// The scan is bounded by `max_scan_keys` and `max_scan_iterations`;
    /// hitting a bound logs and stops early rather than blocking the store.
    /// Deletions run in fixed-size batches. Returns how many keys were
    /// removed.
    pub async fn invalidate(&self, pattern: &str) -> CacheResult<u64> {
        let store_pattern = self.keys.pattern(pattern)?;
        if !self.is_available() {
            return Ok(0);
        }

        let started = Instant::now();
        let matched = self.bounded_scan(&store_pattern).await;

        let mut removed = 0u64;
        for batch in matched.chunks(self.config.delete_batch_size) {
            match self.store.delete(batch).await {
                Ok(n) => removed += n,
                Err(e) => {
                    tracing::warn!(error = %e, pattern = %store_pattern, "Invalidation batch failed");
                    self.note_failure();
                    break;
                }
            }
        }

        self.tracker.record("invalidate", started.elapsed());
        tracing::debug!(pattern = %store_pattern, removed, "Invalidated keys");
        Ok(removed)
    }

    /// Remove every key in this cache's namespace.
    pub async fn flush(&self) -> CacheResult<u64> {
        self.invalidate("*").await
    }

    /// Collect keys matching `pattern` up to the configured scan bounds.
    async fn bounded_scan(&self, pattern: &str) -> Vec<String> {
        let mut matched = Vec::new();
        let mut cursor = 0u64;
        let mut iterations = 0usize;

        loop {
            if iterations >= self.config.max_scan_iterations
                || matched.len() >= self.config.max_scan_keys
            {
                tracing::warn!(
                    pattern = %pattern,
                    iterations,
                    matched = matched.len(),
                    "Scan bound exceeded, stopping early"
                );
                break;
            }

            match self
                .store
                .scan(cursor, pattern, self.config.scan_page_size)
                .await
            {
                Ok((next, page)) => {
                    matched.extend(page);
                    cursor = next;
                    iterations += 1;
                    if cursor == 0 {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, pattern = %pattern, "Scan failed, stopping early");
                    self.note_failure();
                    break;
                }
            }
        }

        matched.truncate(self.config.max_scan_keys);
        matched
    }

    /// Point-in-time stats. Never fails: store gauge errors degrade to
    /// zeros and `connected` reflects the availability flag.
    pub async fn stats(&self) -> CacheStats {
        let connected = self.is_available();
        let info = if connected {
            match self.store.info().await {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!(error = %e, "Store info failed");
                    StoreInfo::default()
                }
            }
        } else {
            StoreInfo::default()
        };

        CacheStats {
            connected,
            key_count: info.key_count,
            memory_bytes: info.memory_bytes,
            active_locks: self.locks.active(),
            performance: self.tracker.snapshot(),
        }
    }
}

impl<T, S> Clone for CoalescingCache<T, S>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: RemoteStore,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            keys: self.keys.clone(),
            codec: self.codec.clone(),
            ttl: self.ttl.clone(),
            locks: Arc::clone(&self.locks),
            tracker: Arc::clone(&self.tracker),
            available: Arc::clone(&self.available),
            reprobing: Arc::clone(&self.reprobing),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;

    fn test_config() -> CacheConfig {
        CacheConfig::default()
            .with_jitter(false)
            .with_lock_grace(Duration::from_millis(20))
    }

    fn new_cache() -> CoalescingCache<String, MemoryStore> {
        CoalescingCache::new(Arc::new(MemoryStore::new()), test_config()).unwrap()
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let cache = new_cache();
        assert!(cache.set("k", &"value".to_string(), None).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some("value".to_string()));
    }

    #[tokio::test]
    async fn test_miss_returns_none() {
        let cache = new_cache();
        assert_eq!(cache.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_key_surfaces_validation_error() {
        let cache = new_cache();
        assert!(cache.get("").await.is_err());
        assert!(cache.set("", &"v".to_string(), None).await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        let cache: CoalescingCache<String, _> =
            CoalescingCache::new(Arc::clone(&store), test_config()).unwrap();

        store
            .set_ex("cache:bad", b"\xde\xad\xbe\xef", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("bad").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_counts_existing() {
        let cache = new_cache();
        cache.set("a", &"1".to_string(), None).await.unwrap();
        cache.set("b", &"2".to_string(), None).await.unwrap();

        let removed = cache.delete(&["a", "b", "missing"]).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_flush_clears_namespace() {
        let cache = new_cache();
        for i in 0..10 {
            cache
                .set(&format!("k{i}"), &"v".to_string(), None)
                .await
                .unwrap();
        }
        assert_eq!(cache.flush().await.unwrap(), 10);
        assert_eq!(cache.get("k0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stats_reports_shape() {
        let cache = new_cache();
        cache.set("k", &"v".to_string(), None).await.unwrap();
        cache.get("k").await.unwrap();

        let stats = cache.stats().await;
        assert!(stats.connected);
        assert_eq!(stats.key_count, 1);
        assert!(stats.memory_bytes > 0);
        assert_eq!(stats.active_locks, 0);
        assert!(stats.performance.contains_key("get"));
        assert!(stats.performance.contains_key("set"));
    }
}
