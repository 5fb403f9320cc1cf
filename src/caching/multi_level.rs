//! # Multi-Level Cache Accessor
//!
//! A bounded local map (L1) in front of the shared store (L2). L1 is purely a
//! read-through accelerator: entries promoted from L2 carry a fixed short TTL,
//! eviction is oldest-inserted-key-first, and the store remains the source of
//! truth for correctness.

use crate::store::KeyValueStore;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

struct L1Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

#[derive(Default)]
struct L1 {
    map: HashMap<String, L1Entry>,
    // Insertion order; each live key appears exactly once.
    order: VecDeque<String>,
}

/// Two-level cache: bounded local L1 over the shared store as L2.
pub struct MultiLevelCache {
    store: Arc<dyn KeyValueStore>,
    capacity: usize,
    promotion_ttl: Duration,
    l1: RwLock<L1>,
}

impl MultiLevelCache {
    pub fn new(store: Arc<dyn KeyValueStore>, capacity: usize, promotion_ttl: Duration) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            promotion_ttl,
            l1: RwLock::new(L1::default()),
        }
    }

    /// Read through L1 then L2, promoting L2 hits into L1 with the short
    /// promotion TTL. Store failures degrade to a miss.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        {
            let mut l1 = self.l1.write().await;
            match l1.map.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    debug!(key = %key, "l1 hit");
                    return Some(entry.value.clone());
                }
                Some(_) => {
                    l1.map.remove(key);
                    l1.order.retain(|k| k != key);
                }
                None => {}
            }
        }

        match self.store.get(key).await {
            Ok(Some(value)) => {
                debug!(key = %key, "l2 hit, promoting");
                self.insert_l1(key, value.clone(), self.promotion_ttl).await;
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "l2 read failed");
                None
            }
        }
    }

    /// Populate both levels. L1 gets the shorter of the entry TTL and the
    /// promotion TTL; L2 write failures are logged, not surfaced.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) {
        self.insert_l1(key, value.to_vec(), ttl.min(self.promotion_ttl))
            .await;
        if let Err(e) = self.store.set_ex(key, value, ttl).await {
            warn!(key = %key, error = %e, "l2 write failed");
        }
    }

    /// Drop a key from L1 (e.g. after store-side invalidation).
    pub async fn evict(&self, key: &str) {
        let mut l1 = self.l1.write().await;
        if l1.map.remove(key).is_some() {
            l1.order.retain(|k| k != key);
        }
    }

    /// Number of live L1 entries.
    pub async fn l1_len(&self) -> usize {
        self.l1.read().await.map.len()
    }

    async fn insert_l1(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let mut l1 = self.l1.write().await;
        let entry = L1Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        if l1.map.insert(key.to_string(), entry).is_none() {
            l1.order.push_back(key.to_string());
        }
        // Overwrites keep their original insertion position.
        while l1.map.len() > self.capacity {
            if let Some(oldest) = l1.order.pop_front() {
                l1.map.remove(&oldest);
            } else {
                break;
            }
        }
    }
}
