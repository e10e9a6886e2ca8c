//! Query result caching with table-dependency invalidation.
//!
//! Cached results derived from a relational query must disappear the
//! moment any table that query reads from is mutated. This crate infers
//! those dependencies from the SQL text itself: a pattern-based extractor
//! pulls the referenced table names out of a statement, the manager tags
//! each cache key with them, and a write statement invalidates every key
//! tagged with an affected table.
//!
//! # Example
//!
//! ```ignore
//! let mgr: QueryCacheManager<Vec<UserRow>, _> =
//!     QueryCacheManager::new(Arc::new(store), config)?;
//!
//! // Reads are cached and stampede-protected.
//! let rows = mgr
//!     .execute("SELECT * FROM users WHERE id = ?", &json!([42]), || async {
//!         run_query(42).await
//!     }, None)
//!     .await?;
//!
//! // Writes run first, then sweep out every entry tagged `users`.
//! mgr.execute("UPDATE users SET name = ? WHERE id = ?", &json!(["ada", 42]), || async {
//!     run_update().await
//! }, None)
//! .await?;
//! ```

pub mod hash;
pub mod manager;
pub mod tables;

pub use hash::query_hash;
pub use manager::{CachedQuery, QueryCacheManager};
pub use tables::{classify_statement, extract_affected_tables, normalize_sql, StatementKind};
