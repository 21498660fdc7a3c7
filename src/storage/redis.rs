// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis-backed [`VolatileCache`] shared by every process.
//!
//! Values are plain Redis strings. Counter values are ASCII decimal
//! integers, so `INCRBY` works on them directly. Increment must never
//! create a missing key, which plain `INCRBY` would do, so both directions
//! go through a small Lua script that checks `EXISTS` first.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, Client, Script};

use crate::resilience::retry::{retry, RetryConfig};
use super::traits::{CacheStats, StorageError, VolatileCache};

const INCREMENT_IF_PRESENT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('INCRBY', KEYS[1], ARGV[1])
end
return false
"#;

fn backend(e: redis::RedisError) -> StorageError {
    StorageError::Backend(e.to_string())
}

pub struct RedisCache {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "blog:" → "blog:Counterhits")
    prefix: String,
    increment_script: Script,
}

impl RedisCache {
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Connect with an optional key prefix.
    ///
    /// The prefix is prepended to every key, which lets several
    /// applications share one Redis instance.
    ///
    /// ```rust,no_run
    /// # use datastore_ext::storage::redis::RedisCache;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let cache = RedisCache::with_prefix("redis://localhost", Some("blog:")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        let client = Client::open(connection_string).map_err(backend)?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(backend)?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
            increment_script: Script::new(INCREMENT_IF_PRESENT),
        })
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn adjust(&self, key: &str, delta: i64) -> Result<Option<i64>, StorageError> {
        let mut conn = self.connection.clone();
        self.increment_script
            .key(self.prefixed_key(key))
            .arg(delta)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)
    }

    /// Delete only this cache's keys; other tenants of the instance are untouched.
    async fn delete_prefixed(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", self.prefix);
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await
                .map_err(backend)?;

            if !keys.is_empty() {
                cmd("DEL")
                    .arg(&keys)
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(backend)?;
            }
            if next == 0 {
                return Ok(());
            }
            cursor = next;
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Read a numeric `field:value` line out of an `INFO` reply.
fn info_field(info: &str, field: &str) -> Option<u64> {
    info.lines().find_map(|line| {
        let (name, value) = line.trim().split_once(':')?;
        (name == field).then(|| value.trim().parse().ok()).flatten()
    })
}

#[async_trait]
impl VolatileCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut conn = self.connection.clone();
        cmd("GET")
            .arg(self.prefixed_key(key))
            .query_async(&mut conn)
            .await
            .map_err(backend)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let mut command = cmd("SET");
        command.arg(self.prefixed_key(key)).arg(value);
        if let Some(ttl) = ttl {
            command.arg("PX").arg(ttl_millis(ttl));
        }
        command.query_async::<()>(&mut conn).await.map_err(backend)
    }

    async fn add(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, StorageError> {
        let mut conn = self.connection.clone();
        let mut command = cmd("SET");
        command.arg(self.prefixed_key(key)).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            command.arg("PX").arg(ttl_millis(ttl));
        }
        let reply: Option<String> = command.query_async(&mut conn).await.map_err(backend)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.connection.clone();
        let removed: i64 = cmd("DEL")
            .arg(self.prefixed_key(key))
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(removed > 0)
    }

    async fn increment(&self, key: &str, delta: u64) -> Result<Option<i64>, StorageError> {
        self.adjust(key, delta as i64).await
    }

    async fn decrement(&self, key: &str, delta: u64) -> Result<Option<i64>, StorageError> {
        self.adjust(key, -(delta as i64)).await
    }

    async fn flush_all(&self) -> Result<(), StorageError> {
        if !self.prefix.is_empty() {
            return self.delete_prefixed().await;
        }
        let mut conn = self.connection.clone();
        cmd("FLUSHDB")
            .query_async::<()>(&mut conn)
            .await
            .map_err(backend)
    }

    async fn stats(&self) -> Result<CacheStats, StorageError> {
        let mut conn = self.connection.clone();
        let stats: String = cmd("INFO").arg("stats").query_async(&mut conn).await.map_err(backend)?;
        let memory: String = cmd("INFO").arg("memory").query_async(&mut conn).await.map_err(backend)?;
        let items: u64 = cmd("DBSIZE").query_async(&mut conn).await.map_err(backend)?;

        Ok(CacheStats {
            hits: info_field(&stats, "keyspace_hits").unwrap_or(0),
            misses: info_field(&stats, "keyspace_misses").unwrap_or(0),
            items,
            bytes: info_field(&memory, "used_memory").unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_field_parsing() {
        let info = "# Stats\r\ntotal_connections_received:4\r\nkeyspace_hits:17\r\nkeyspace_misses:3\r\n";
        assert_eq!(info_field(info, "keyspace_hits"), Some(17));
        assert_eq!(info_field(info, "keyspace_misses"), Some(3));
        assert_eq!(info_field(info, "evicted_keys"), None);
    }

    #[test]
    fn test_info_field_ignores_non_numeric() {
        assert_eq!(info_field("role:master\r\n", "role"), None);
    }

    #[test]
    fn test_ttl_is_at_least_one_millisecond() {
        assert_eq!(ttl_millis(Duration::from_secs(30)), 30_000);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
    }
}
