//! Redis-backed remote store.
//!
//! Wraps a single shared [`ConnectionManager`]: reconnects after a dropped
//! connection are single-flighted inside the manager, so concurrent cache
//! operations never trigger a reconnect storm. Initial connectivity is
//! probed with bounded exponential backoff before the store is handed to
//! the cache core.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use stratus_core::{CacheConfig, CacheResult, ConnectionError};

use crate::store::{RemoteStore, StoreInfo};

/// Remote store client speaking the Redis protocol.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("manager", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisStore {
    /// Connect to the store, retrying the initial ping with bounded
    /// exponential backoff.
    ///
    /// Returns [`ConnectionError::RetriesExhausted`] once
    /// `config.connect_retries` attempts have failed; callers construct the
    /// cache in unavailable (degraded) state in that case rather than
    /// failing outright.
    pub async fn connect(url: &str, config: &CacheConfig) -> CacheResult<Self> {
        let client = redis::Client::open(url).map_err(|e| ConnectionError::Unreachable {
            reason: e.to_string(),
        })?;

        let started = std::time::Instant::now();
        let mut backoff = config.connect_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match ConnectionManager::new(client.clone()).await {
                Ok(manager) => {
                    let store = Self { manager };
                    match store.ping().await {
                        Ok(()) => {
                            tracing::info!(url = %url, attempt, "Connected to remote store");
                            return Ok(store);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, attempt, "Store ping failed");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "Store connection failed");
                }
            }

            if attempt >= config.connect_retries {
                return Err(ConnectionError::RetriesExhausted {
                    attempts: attempt,
                    elapsed: started.elapsed(),
                }
                .into());
            }

            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
        }
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn command_error(command: &str, err: redis::RedisError) -> ConnectionError {
    ConnectionError::CommandFailed {
        command: command.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> = self
            .conn()
            .get(key)
            .await
            .map_err(|e| command_error("GET", e))?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        // SETEX takes whole seconds; the TTL policy already floors at 1s.
        let secs = ttl.as_secs().max(1);
        let _: () = self
            .conn()
            .set_ex(key, value, secs)
            .await
            .map_err(|e| command_error("SETEX", e))?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = self
            .conn()
            .del(keys)
            .await
            .map_err(|e| command_error("DEL", e))?;
        Ok(removed)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> CacheResult<(u64, Vec<String>)> {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| command_error("SCAN", e))?;
        Ok((next, keys))
    }

    async fn info(&self) -> CacheResult<StoreInfo> {
        let key_count: u64 = redis::cmd("DBSIZE")
            .query_async(&mut self.conn())
            .await
            .map_err(|e| command_error("DBSIZE", e))?;

        let memory_info: String = redis::cmd("INFO")
            .arg("memory")
            .query_async(&mut self.conn())
            .await
            .map_err(|e| command_error("INFO", e))?;

        Ok(StoreInfo {
            key_count,
            memory_bytes: parse_used_memory(&memory_info).unwrap_or(0),
        })
    }

    async fn ping(&self) -> CacheResult<()> {
        let pong: String = redis::cmd("PING")
            .query_async(&mut self.conn())
            .await
            .map_err(|e| command_error("PING", e))?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(ConnectionError::CommandFailed {
                command: "PING".to_string(),
                reason: format!("unexpected reply: {}", pong),
            }
            .into())
        }
    }
}

/// Pull `used_memory:<bytes>` out of an INFO memory reply.
fn parse_used_memory(info: &str) -> Option<u64> {
    info.lines().find_map(|line| {
        line.strip_prefix("used_memory:")
            .and_then(|rest| rest.trim().parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_used_memory() {
        let info = "# Memory\r\nused_memory:1048576\r\nused_memory_human:1.00M\r\n";
        assert_eq!(parse_used_memory(info), Some(1_048_576));
    }

    #[test]
    fn test_parse_used_memory_missing() {
        assert_eq!(parse_used_memory("# Memory\r\nmaxmemory:0\r\n"), None);
        assert_eq!(parse_used_memory(""), None);
    }

    #[test]
    fn test_parse_used_memory_ignores_derived_fields() {
        // used_memory_rss must not be mistaken for used_memory.
        let info = "used_memory_rss:999\r\nused_memory:42\r\n";
        assert_eq!(parse_used_memory(info), Some(42));
    }
}
