//! # Key-Value Store Boundary
//!
//! All stateful components (cache policies, rate limiter) depend on a single
//! shared associative store through the [`KeyValueStore`] trait. Two backends
//! are provided: Redis for deployment and an in-memory store for tests and
//! store-less runs. Per-key operations are atomic as provided by the backend;
//! no cross-operation locking is offered or assumed.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::{RedisStore, RedisStoreConfig};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Store operation result.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store-specific error types.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store backend error: {message}")]
    Backend { message: String },

    #[error("value at key is not an integer")]
    NotAnInteger,
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Shared key-value store protocol.
///
/// `scan` follows the cursor protocol: callers pass the cursor from the previous
/// round (starting at 0) and are done when the returned cursor is 0 again. A
/// single round is never assumed to return all matches.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Set a value with an expiry.
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()>;

    /// Atomically increment the integer at `key`, creating it at 1.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Set an expiry on an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Remaining time-to-live for a key, if it exists and has an expiry.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Delete a batch of keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    /// One round of a cursor-based scan for keys matching a glob pattern.
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)>;

    /// Server-side stats blob for the given section (e.g. `stats`).
    async fn info(&self, section: &str) -> StoreResult<String>;

    /// Liveness check.
    async fn ping(&self) -> StoreResult<()>;
}

/// Parse a `field:value` integer line out of an INFO-style stats blob.
pub(crate) fn parse_info_field(blob: &str, field: &str) -> Option<u64> {
    blob.lines()
        .map(str::trim)
        .find(|line| line.starts_with(field) && line[field.len()..].starts_with(':'))
        .and_then(|line| line.split(':').nth(1))
        .and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_info_fields() {
        let blob = "# Stats\r\nkeyspace_hits:42\r\nkeyspace_misses:7\r\n";
        assert_eq!(parse_info_field(blob, "keyspace_hits"), Some(42));
        assert_eq!(parse_info_field(blob, "keyspace_misses"), Some(7));
        assert_eq!(parse_info_field(blob, "keyspace"), None);
    }
}
