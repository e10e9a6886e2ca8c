//! In-memory remote store.
//!
//! A process-local [`RemoteStore`] with the same observable contract as the
//! Redis backend: SETEX expiry, glob-pattern cursor scans, and aggregate
//! gauges. It backs the integration test suites and doubles as a fallback
//! backend when no remote store is deployed.
//!
//! The `online` toggle simulates an outage: while offline every operation
//! fails with a connection error, which the cache core must absorb.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use stratus_core::{CacheResult, ConnectionError};

use crate::store::{RemoteStore, StoreInfo};

#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local store with Redis-shaped semantics.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    offline: AtomicBool,
}

impl MemoryStore {
    /// Create an empty, online store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated connectivity.
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    /// Current number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .count()
    }

    /// True when the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> CacheResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ConnectionError::Unreachable {
                reason: "store offline".to_string(),
            }
            .into())
        } else {
            Ok(())
        }
    }
}

/// Redis-style glob match supporting `*` and `?`.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();
    match_inner(&p, &k)
}

fn match_inner(pattern: &[char], key: &[char]) -> bool {
    match (pattern.first(), key.first()) {
        (None, None) => true,
        (Some('*'), _) => {
            // Either the star consumes nothing, or it consumes one key char
            // and stays in play.
            match_inner(&pattern[1..], key)
                || (!key.is_empty() && match_inner(pattern, &key[1..]))
        }
        (Some('?'), Some(_)) => match_inner(&pattern[1..], &key[1..]),
        (Some(p), Some(c)) if p == c => match_inner(&pattern[1..], &key[1..]),
        _ => false,
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.check_online()?;
        let now = Instant::now();
        // Copy out of the shard guard before any removal: `remove` takes a
        // write lock on the shard the read guard would still be holding.
        let found = self
            .entries
            .get(key)
            .map(|entry| (entry.is_expired(now), entry.bytes.clone()));
        match found {
            Some((false, bytes)) => Ok(Some(bytes)),
            Some((true, _)) => {
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.check_online()?;
        // A TTL too large to represent as an instant means no expiry.
        let expires_at = Instant::now().checked_add(ttl);
        self.entries.insert(
            key.to_string(),
            Entry {
                bytes: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        self.check_online()?;
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> CacheResult<(u64, Vec<String>)> {
        self.check_online()?;
        let now = Instant::now();

        // Snapshot and sort so cursors stay stable across pages even while
        // concurrent writes land.
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();

        let start = cursor as usize;
        if start >= keys.len() {
            return Ok((0, Vec::new()));
        }

        let end = (start + count.max(1)).min(keys.len());
        let page: Vec<String> = keys[start..end]
            .iter()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();

        let next = if end >= keys.len() { 0 } else { end as u64 };
        Ok((next, page))
    }

    async fn info(&self) -> CacheResult<StoreInfo> {
        self.check_online()?;
        let now = Instant::now();
        let mut key_count = 0u64;
        let mut memory_bytes = 0u64;
        for entry in self.entries.iter() {
            if !entry.value().is_expired(now) {
                key_count += 1;
                memory_bytes += (entry.key().len() + entry.value().bytes.len()) as u64;
            }
        }
        Ok(StoreInfo {
            key_count,
            memory_bytes,
        })
    }

    async fn ping(&self) -> CacheResult<()> {
        self.check_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store
            .set_ex("a", b"one", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.delete(&["a".to_string()]).await.unwrap(), 1);
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.delete(&["a".to_string()]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expiry_is_honored() {
        let store = MemoryStore::new();
        store
            .set_ex("gone", b"x", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_read_purges_and_store_stays_usable() {
        let store = MemoryStore::new();
        store
            .set_ex("stale", b"x", Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The expired read removes the entry and must not wedge the shard.
        assert_eq!(store.get("stale").await.unwrap(), None);
        assert_eq!(store.len(), 0);

        store
            .set_ex("stale", b"y", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("stale").await.unwrap(), Some(b"y".to_vec()));
    }

    #[tokio::test]
    async fn test_enormous_ttl_means_no_expiry() {
        let store = MemoryStore::new();
        store
            .set_ex("forever", b"x", Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert_eq!(store.get("forever").await.unwrap(), Some(b"x".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_store_errors() {
        let store = MemoryStore::new();
        store.set_online(false);

        assert!(store.get("a").await.is_err());
        assert!(store.set_ex("a", b"x", Duration::from_secs(1)).await.is_err());
        assert!(store.ping().await.is_err());

        store.set_online(true);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_scan_pages_cover_all_matches() {
        let store = MemoryStore::new();
        for i in 0..25 {
            store
                .set_ex(&format!("user:{i:02}"), b"v", Duration::from_secs(60))
                .await
                .unwrap();
        }
        store
            .set_ex("other:1", b"v", Duration::from_secs(60))
            .await
            .unwrap();

        let mut cursor = 0u64;
        let mut found = Vec::new();
        loop {
            let (next, page) = store.scan(cursor, "user:*", 10).await.unwrap();
            found.extend(page);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(found.len(), 25);
        assert!(found.iter().all(|k| k.starts_with("user:")));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("user:*", "user:1"));
        assert!(glob_match("user:*", "user:"));
        assert!(!glob_match("user:*", "users:1"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("u?er:1", "user:1"));
        assert!(!glob_match("u?er:1", "uer:1"));
        assert!(glob_match("*|users|*", "q:|orders||users|:abc"));
        assert!(!glob_match("*|users|*", "q:|users_archive|:abc"));
    }
}
