//! Query result caching with table-tagged invalidation.
//!
//! Cache keys embed the affected tables as pipe-wrapped tags so that a
//! write to a table can invalidate every dependent entry with a single
//! pattern scan, without a secondary index:
//!
//! ```text
//! q:|customers||orders|:3f1a...   pattern for `orders`: q:*|orders|*
//! ```
//!
//! The pipe wrapping prevents substring collisions (`users` never
//! matches `users_archive`).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stratus_cache::{CoalescingCache, RemoteStore};
use stratus_core::{CacheConfig, CacheResult};

use crate::hash::query_hash;
use crate::tables::{classify_statement, extract_affected_tables};

/// How many per-table invalidations run concurrently during fan-out.
const INVALIDATE_FANOUT: usize = 5;

/// A cached query result with its table dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedQuery<T> {
    pub result: T,
    pub tables: Vec<String>,
    pub cached_at: DateTime<Utc>,
}

/// Caches read-statement results and invalidates them when the tables
/// they depend on are written.
pub struct QueryCacheManager<T, S>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: RemoteStore,
{
    cache: CoalescingCache<CachedQuery<T>, S>,
}

impl<T, S> QueryCacheManager<T, S>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: RemoteStore,
{
    pub fn new(store: Arc<S>, config: CacheConfig) -> CacheResult<Self> {
        Ok(Self {
            cache: CoalescingCache::new(store, config)?,
        })
    }

    /// Build a manager over an already-constructed cache, sharing its
    /// connection state and lock registry.
    pub fn from_cache(cache: CoalescingCache<CachedQuery<T>, S>) -> Self {
        Self { cache }
    }

    /// The underlying coalescing cache.
    pub fn cache(&self) -> &CoalescingCache<CachedQuery<T>, S> {
        &self.cache
    }

    /// Cache a query result under a key tagged with its affected tables.
    pub async fn cache_query(
        &self,
        sql: &str,
        params: &serde_json::Value,
        result: T,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let tables = extract_affected_tables(sql);
        let key = query_key(sql, params, &tables);
        let entry = CachedQuery {
            result,
            tables: tables.into_iter().collect(),
            cached_at: Utc::now(),
        };
        self.cache.set(&key, &entry, ttl).await
    }

    /// Look up a previously cached result for this statement and params.
    pub async fn get_cached_query(
        &self,
        sql: &str,
        params: &serde_json::Value,
    ) -> CacheResult<Option<T>> {
        let tables = extract_affected_tables(sql);
        let key = query_key(sql, params, &tables);
        Ok(self.cache.get(&key).await?.map(|entry| entry.result))
    }

    /// Execute a statement through the cache.
    ///
    /// Writes run `perform` first and then invalidate every key tagged
    /// with an affected table, so no reader can be served a result
    /// computed from pre-write state after the write commits. Reads go
    /// through the stampede-protected populate path with `perform` as
    /// the populate callback.
    pub async fn execute<F, Fut>(
        &self,
        sql: &str,
        params: &serde_json::Value,
        perform: F,
        ttl: Option<Duration>,
    ) -> CacheResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = CacheResult<T>> + Send + 'static,
    {
        let kind = classify_statement(sql);
        let tables = extract_affected_tables(sql);

        if kind.is_write() {
            let result = perform().await?;
            let affected: Vec<&str> = tables.iter().map(String::as_str).collect();
            self.invalidate_tables(&affected).await?;
            return Ok(result);
        }

        let key = query_key(sql, params, &tables);
        let tags: Vec<String> = tables.into_iter().collect();
        let entry = self
            .cache
            .get_or_populate(
                &key,
                move || async move {
                    let result = perform().await?;
                    Ok(CachedQuery {
                        result,
                        tables: tags,
                        cached_at: Utc::now(),
                    })
                },
                ttl,
            )
            .await?;
        Ok(entry.result)
    }

    /// Invalidate every cached query tagged with any of `tables`.
    ///
    /// Fans out one pattern-invalidation per table, bounded to
    /// [`INVALIDATE_FANOUT`] concurrent store scans. Returns the total
    /// number of keys removed.
    pub async fn invalidate_tables(&self, tables: &[&str]) -> CacheResult<u64> {
        let mut removed = 0u64;
        for chunk in tables.chunks(INVALIDATE_FANOUT) {
            let scans = chunk
                .iter()
                .map(|table| {
                    let pattern = table_pattern(table);
                    async move { self.cache.invalidate(&pattern).await }
                });
            for outcome in join_all(scans).await {
                removed += outcome?;
            }
        }

        if removed > 0 {
            tracing::debug!(tables = ?tables, removed, "Invalidated table-tagged cache entries");
        }
        Ok(removed)
    }
}

/// Cache key for a statement: `q:` + sorted pipe-wrapped table tags +
/// `:` + query fingerprint. Statements touching no recognizable table
/// carry an empty tag segment and are only removed by a full flush.
fn query_key(sql: &str, params: &serde_json::Value, tables: &BTreeSet<String>) -> String {
    let tags: String = tables.iter().map(|t| format!("|{t}|")).collect();
    format!("q:{tags}:{}", query_hash(sql, params))
}

/// Scan pattern matching every key tagged with `table`.
fn table_pattern(table: &str) -> String {
    format!("q:*|{table}|*")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stratus_cache::MemoryStore;

    fn manager() -> QueryCacheManager<Vec<String>, MemoryStore> {
        QueryCacheManager::new(Arc::new(MemoryStore::new()), CacheConfig::default())
            .unwrap()
    }

    #[test]
    fn test_query_key_shape() {
        let tables: BTreeSet<String> =
            ["orders", "users"].iter().map(|s| s.to_string()).collect();
        let key = query_key("SELECT 1", &json!([]), &tables);
        assert!(key.starts_with("q:|orders||users|:"));
        assert_eq!(key.len(), "q:|orders||users|:".len() + 32);
    }

    #[test]
    fn test_table_pattern_is_collision_free() {
        // `users_archive` keys must not match the `users` pattern.
        let pattern = table_pattern("users");
        assert_eq!(pattern, "q:*|users|*");
    }

    #[tokio::test]
    async fn test_cache_and_get_round_trip() {
        let mgr = manager();
        let sql = "SELECT name FROM users WHERE id = ?";
        let params = json!([7]);
        let rows = vec!["ada".to_string()];

        assert!(mgr.cache_query(sql, &params, rows.clone(), None).await.unwrap());
        assert_eq!(mgr.get_cached_query(sql, &params).await.unwrap(), Some(rows));
    }

    #[tokio::test]
    async fn test_get_cached_query_miss() {
        let mgr = manager();
        let found = mgr
            .get_cached_query("SELECT name FROM users", &json!([]))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_params_distinguish_entries() {
        let mgr = manager();
        let sql = "SELECT name FROM users WHERE id = ?";
        mgr.cache_query(sql, &json!([1]), vec!["one".to_string()], None)
            .await
            .unwrap();
        mgr.cache_query(sql, &json!([2]), vec!["two".to_string()], None)
            .await
            .unwrap();

        assert_eq!(
            mgr.get_cached_query(sql, &json!([1])).await.unwrap(),
            Some(vec!["one".to_string()])
        );
        assert_eq!(
            mgr.get_cached_query(sql, &json!([2])).await.unwrap(),
            Some(vec!["two".to_string()])
        );
    }

    #[tokio::test]
    async fn test_invalidate_tables_removes_tagged_entries() {
        let mgr = manager();
        mgr.cache_query(
            "SELECT * FROM users",
            &json!([]),
            vec!["u".to_string()],
            None,
        )
        .await
        .unwrap();
        mgr.cache_query(
            "SELECT * FROM orders",
            &json!([]),
            vec!["o".to_string()],
            None,
        )
        .await
        .unwrap();

        let removed = mgr.invalidate_tables(&["users"]).await.unwrap();
        assert_eq!(removed, 1);
        assert!(mgr
            .get_cached_query("SELECT * FROM users", &json!([]))
            .await
            .unwrap()
            .is_none());
        assert!(mgr
            .get_cached_query("SELECT * FROM orders", &json!([]))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_invalidation_does_not_hit_similar_table_names() {
        let mgr = manager();
        mgr.cache_query(
            "SELECT * FROM users_archive",
            &json!([]),
            vec!["old".to_string()],
            None,
        )
        .await
        .unwrap();

        let removed = mgr.invalidate_tables(&["users"]).await.unwrap();
        assert_eq!(removed, 0);
        assert!(mgr
            .get_cached_query("SELECT * FROM users_archive", &json!([]))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_execute_read_caches_result() {
        let mgr = manager();
        let sql = "SELECT * FROM users WHERE id = ?";
        let params = json!([1]);

        let first = mgr
            .execute(sql, &params, || async { Ok(vec!["ada".to_string()]) }, None)
            .await
            .unwrap();
        assert_eq!(first, vec!["ada".to_string()]);

        // Second call is served from cache, not the perform callback.
        let second = mgr
            .execute(
                sql,
                &params,
                || async { panic!("perform should not run on a cache hit") },
                None,
            )
            .await
            .unwrap();
        assert_eq!(second, vec!["ada".to_string()]);
    }

    #[tokio::test]
    async fn test_execute_write_invalidates_dependent_reads() {
        let mgr = manager();
        let read_sql = "SELECT balance FROM accounts WHERE id = ?";
        let params = json!([1]);

        mgr.execute(read_sql, &params, || async { Ok(vec!["100".to_string()]) }, None)
            .await
            .unwrap();
        assert!(mgr.get_cached_query(read_sql, &params).await.unwrap().is_some());

        mgr.execute(
            "UPDATE accounts SET balance = ? WHERE id = ?",
            &json!([200, 1]),
            || async { Ok(vec![]) },
            None,
        )
        .await
        .unwrap();

        assert!(mgr.get_cached_query(read_sql, &params).await.unwrap().is_none());
    }
}
