//! # Cache Policies
//!
//! The policy engine implements the four read/write strategies over the shared
//! store. Values serialize through JSON bytes; a payload that fails to
//! deserialize on a hit is treated as a miss rather than an error.
//!
//! Concurrency: cache-aside holds no lock across its check-then-set sequence,
//! so two concurrent misses on the same key may both run the producer and both
//! write the entry. Last write wins; this is an accepted race, preserved as the
//! default behavior. Setting `coalesce_misses` shares one producer run between
//! concurrent misses instead.

use crate::caching::multi_level::MultiLevelCache;
use crate::core::config::CacheSettings;
use crate::core::error::GatewayResult;
use crate::store::{parse_info_field, KeyValueStore};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Result of a policy read: the value plus whether it came from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cached<T> {
    pub data: T,
    pub cached: bool,
}

/// Hit/miss statistics sourced from the store's own server-side counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses) * 100`, zero when no data
    pub hit_rate: f64,
}

/// Cache policy engine over the shared key-value store. Reads and writes go
/// through a bounded local promotion cache (L1) in front of the store; the
/// store stays the source of truth.
pub struct CacheEngine {
    store: Arc<dyn KeyValueStore>,
    levels: MultiLevelCache,
    settings: CacheSettings,
    in_flight: DashMap<String, Arc<Notify>>,
}

impl CacheEngine {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: CacheSettings) -> Self {
        let levels = MultiLevelCache::new(store.clone(), settings.l1_capacity, settings.l1_ttl);
        Self {
            store,
            levels,
            settings,
            in_flight: DashMap::new(),
        }
    }

    /// Cache-aside: read the key; on miss run the producer and populate.
    ///
    /// Store failures degrade to pass-through: the producer runs and its result
    /// is returned with `cached = false`, never a request failure.
    pub async fn cache_aside<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        produce: F,
    ) -> GatewayResult<Cached<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        if self.settings.coalesce_misses {
            self.cache_aside_coalesced(key, ttl, produce).await
        } else {
            match self.read(key).await {
                Some(data) => Ok(Cached { data, cached: true }),
                None => {
                    let data = produce().await?;
                    self.write(key, &data, ttl).await;
                    Ok(Cached {
                        data,
                        cached: false,
                    })
                }
            }
        }
    }

    /// Cache-aside with per-key in-flight coalescing: concurrent misses for the
    /// same key wait on the first producer run and then re-read the cache.
    async fn cache_aside_coalesced<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        produce: F,
    ) -> GatewayResult<Cached<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        loop {
            if let Some(data) = self.read(key).await {
                return Ok(Cached { data, cached: true });
            }

            let waiter = match self.in_flight.entry(key.to_string()) {
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(Arc::new(Notify::new()));
                    None
                }
                dashmap::mapref::entry::Entry::Occupied(slot) => Some(slot.get().clone()),
            };

            match waiter {
                None => {
                    // Leader: produce, populate, wake waiters even on failure so
                    // one of them can take over.
                    let result = produce().await;
                    let notify = self
                        .in_flight
                        .remove(key)
                        .map(|(_, notify)| notify)
                        .unwrap_or_default();
                    match result {
                        Ok(data) => {
                            self.write(key, &data, ttl).await;
                            notify.notify_waiters();
                            return Ok(Cached {
                                data,
                                cached: false,
                            });
                        }
                        Err(e) => {
                            notify.notify_waiters();
                            return Err(e);
                        }
                    }
                }
                Some(notify) => {
                    let mut notified = std::pin::pin!(notify.notified());
                    notified.as_mut().enable();
                    // The leader may have finished between the entry lookup and
                    // here; only wait while its marker is still present.
                    if self.in_flight.contains_key(key) {
                        notified.await;
                    }
                }
            }
        }
    }

    /// Write-through: persist first, cache only on success. Persist failures
    /// propagate to the caller without touching the cache.
    pub async fn write_through<T, F, Fut>(
        &self,
        key: &str,
        data: &T,
        ttl: Duration,
        persist: F,
    ) -> GatewayResult<()>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<()>>,
    {
        persist().await?;
        self.write(key, data, ttl).await;
        Ok(())
    }

    /// Write-behind: cache first for read-after-write consistency, then persist
    /// asynchronously. Persist failures are logged, not surfaced; the caller
    /// has already returned.
    pub async fn write_behind<T, F, Fut>(&self, key: &str, data: &T, ttl: Duration, persist: F)
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<()>> + Send + 'static,
    {
        self.write(key, data, ttl).await;
        let key = key.to_string();
        let fut = persist();
        tokio::spawn(async move {
            if let Err(e) = fut.await {
                warn!(key = %key, error = %e, "write-behind persist failed");
            }
        });
    }

    /// Refresh-ahead: serve hits from the cache, and when a hit's remaining TTL
    /// fraction drops below `1 - refresh_threshold`, rewrite the entry in the
    /// background while still returning the cached value. Misses behave as
    /// cache-aside.
    pub async fn refresh_ahead<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        produce: F,
    ) -> GatewayResult<Cached<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>> + Send + 'static,
    {
        if let Some(data) = self.read::<T>(key).await {
            let remaining = match self.store.ttl(key).await {
                Ok(Some(remaining)) => remaining,
                Ok(None) => ttl,
                Err(e) => {
                    warn!(key = %key, error = %e, "ttl lookup failed, skipping refresh check");
                    ttl
                }
            };

            let fraction = remaining.as_secs_f64() / ttl.as_secs_f64().max(f64::EPSILON);
            if fraction < 1.0 - self.settings.refresh_threshold {
                debug!(key = %key, fraction, "refresh-ahead triggered");
                let store = self.store.clone();
                let key = key.to_string();
                let fut = produce();
                tokio::spawn(async move {
                    match fut.await {
                        Ok(fresh) => match serde_json::to_vec(&fresh) {
                            Ok(bytes) => {
                                if let Err(e) = store.set_ex(&key, &bytes, ttl).await {
                                    warn!(key = %key, error = %e, "refresh-ahead rewrite failed");
                                }
                            }
                            Err(e) => {
                                warn!(key = %key, error = %e, "refresh-ahead serialization failed")
                            }
                        },
                        Err(e) => warn!(key = %key, error = %e, "refresh-ahead producer failed"),
                    }
                });
            }
            return Ok(Cached { data, cached: true });
        }

        let data = produce().await?;
        self.write(key, &data, ttl).await;
        Ok(Cached {
            data,
            cached: false,
        })
    }

    /// Delete every key matching a glob pattern, scanning with the cursor
    /// protocol and deleting in batches. Tolerates partial failure by returning
    /// the count deleted so far.
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let mut cursor = 0;
        let mut deleted = 0;
        loop {
            let (next_cursor, keys) = match self.store.scan(cursor, pattern, 100).await {
                Ok(round) => round,
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, deleted, "scan failed mid-invalidation");
                    return deleted;
                }
            };

            if !keys.is_empty() {
                match self.store.delete(&keys).await {
                    Ok(count) => {
                        deleted += count;
                        for key in &keys {
                            self.levels.evict(key).await;
                        }
                    }
                    Err(e) => {
                        warn!(pattern = %pattern, error = %e, deleted, "delete failed mid-invalidation");
                        return deleted;
                    }
                }
            }

            if next_cursor == 0 {
                return deleted;
            }
            cursor = next_cursor;
        }
    }

    /// Hit/miss statistics from the store's server-side counters, not the
    /// engine's local bookkeeping.
    pub async fn stats(&self) -> GatewayResult<CacheStats> {
        let blob = self.store.info("stats").await?;
        let hits = parse_info_field(&blob, "keyspace_hits").unwrap_or(0);
        let misses = parse_info_field(&blob, "keyspace_misses").unwrap_or(0);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64 * 100.0
        };
        Ok(CacheStats {
            hits,
            misses,
            hit_rate,
        })
    }

    /// Fault-tolerant read through L1 then the store: store errors and
    /// undecodable payloads count as misses.
    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.levels.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(key = %key, error = %e, "cached payload undecodable, treating as miss");
                None
            }
        }
    }

    /// Fault-tolerant write to both levels: failures are logged and swallowed.
    async fn write<T: Serialize>(&self, key: &str, data: &T, ttl: Duration) {
        let bytes = match serde_json::to_vec(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "cache serialization failed, skipping write");
                return;
            }
        };
        self.levels.set(key, &bytes, ttl).await;
    }
}
