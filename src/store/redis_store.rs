//! # Redis Store Backend
//!
//! Redis-backed implementation of [`KeyValueStore`] using a connection manager
//! that transparently re-establishes dropped connections. All keys are
//! namespaced under a configurable prefix; callers work in logical key space
//! and never see the prefix.

use super::{KeyValueStore, StoreError, StoreResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Redis store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    pub url: String,

    /// Key prefix for all entries
    pub key_prefix: String,

    /// SCAN batch hint
    pub scan_count: usize,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "relay:".to_string(),
            scan_count: 100,
        }
    }
}

/// Redis-backed key-value store.
pub struct RedisStore {
    config: RedisStoreConfig,
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis and build the store.
    pub async fn connect(config: RedisStoreConfig) -> StoreResult<Self> {
        let client = Client::open(config.url.as_str())?;
        let manager = ConnectionManager::new(client).await?;
        info!(url = %config.url, "connected to redis store");
        Ok(Self { config, manager })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(&self.config.key_prefix).unwrap_or(key)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = conn.get(self.full_key(key)).await?;
        debug!(key = %key, hit = value.is_some(), "redis get");
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(self.full_key(key), value, ttl.as_secs())
            .await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.manager.clone();
        let count: i64 = conn.incr(self.full_key(key), 1).await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let set: bool = conn
            .expire(self.full_key(key), ttl.as_secs() as i64)
            .await?;
        Ok(set)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut conn = self.manager.clone();
        let remaining: i64 = redis::cmd("TTL")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await?;
        // -2 means the key is absent, -1 means no expiry is set.
        if remaining < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_secs(remaining as u64)))
        }
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        let full_keys: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();
        let deleted: u64 = conn.del(full_keys).await?;
        Ok(deleted)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        let mut conn = self.manager.clone();
        let count = if count == 0 {
            self.config.scan_count
        } else {
            count
        };
        let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(self.full_key(pattern))
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        let keys = keys
            .iter()
            .map(|k| self.strip_prefix(k).to_string())
            .collect();
        Ok((next_cursor, keys))
    }

    async fn info(&self, section: &str) -> StoreResult<String> {
        let mut conn = self.manager.clone();
        let blob: String = redis::cmd("INFO")
            .arg(section)
            .query_async(&mut conn)
            .await?;
        Ok(blob)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let response: String = redis::cmd("PING").query_async(&mut conn).await?;
        if response == "PONG" {
            Ok(())
        } else {
            Err(StoreError::backend(format!(
                "unexpected ping response: {}",
                response
            )))
        }
    }
}
