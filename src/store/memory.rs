//! # In-Memory Store Backend
//!
//! A `DashMap`-backed implementation of [`KeyValueStore`] with lazy expiry,
//! used by the test suite and by store-less deployments. It synthesizes the
//! same `keyspace_hits`/`keyspace_misses` INFO fields as Redis so the cache
//! stats path is identical across backends.

use super::{KeyValueStore, StoreError, StoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn counter(initial: i64) -> Self {
        Self::new(initial.to_string().into_bytes(), None)
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory key-value store.
#[derive(Default)]
pub struct MemoryStore {
    data: DashMap<String, Entry>,
    hits: AtomicU64,
    misses: AtomicU64,
    // Open scan positions: token -> last key handed out. Resuming after a key
    // (rather than at an offset) keeps the cursor stable when callers delete
    // returned batches between rounds.
    scan_tokens: DashMap<u64, String>,
    next_scan_token: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries eagerly. Expiry is otherwise lazy, so tests that
    /// assert on key counts call this first.
    pub fn evict_expired(&self) {
        self.data.retain(|_, entry| !entry.is_expired());
    }

    fn live_value(&self, key: &str) -> Option<Vec<u8>> {
        // The read guard must drop before removing an expired entry, or the
        // remove would deadlock against our own shard lock.
        let expired = match self.data.get(key) {
            Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.data.remove(key);
        }
        None
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match self.live_value(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        self.data
            .insert(key.to_string(), Entry::new(value.to_vec(), Some(ttl)));
        Ok(())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut not_an_integer = false;
        let entry = self
            .data
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.is_expired() {
                    *entry = Entry::counter(1);
                    return;
                }
                let current = std::str::from_utf8(&entry.value)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok());
                match current {
                    Some(n) => entry.value = (n + 1).to_string().into_bytes(),
                    None => not_an_integer = true,
                }
            })
            .or_insert_with(|| Entry::counter(1));

        if not_an_integer {
            return Err(StoreError::NotAnInteger);
        }
        let count = std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(StoreError::NotAnInteger)?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        match self.data.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        match self.data.get(key) {
            Some(entry) if !entry.is_expired() => Ok(entry
                .expires_at
                .map(|at| at.saturating_duration_since(Instant::now()))),
            _ => Ok(None),
        }
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        let mut deleted = 0;
        for key in keys {
            if self.data.remove(key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        let count = if count == 0 { 100 } else { count };
        let resume_after = if cursor == 0 {
            None
        } else {
            match self.scan_tokens.remove(&cursor) {
                Some((_, last)) => Some(last),
                // The scan this cursor belonged to is gone; report completion.
                None => return Ok((0, Vec::new())),
            }
        };

        // Snapshot the live matches in sorted order and resume strictly after
        // the last key handed out. Keys deleted between rounds shift offsets
        // but not the position of the survivors.
        let mut matching: Vec<String> = self
            .data
            .iter()
            .filter(|entry| !entry.value().is_expired() && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        matching.sort();

        let start = match &resume_after {
            Some(last) => matching.partition_point(|k| k.as_str() <= last.as_str()),
            None => 0,
        };
        let end = (start + count).min(matching.len());
        let batch = matching[start..end].to_vec();

        match batch.last() {
            Some(last) if end < matching.len() => {
                let token = self.next_scan_token.fetch_add(1, Ordering::Relaxed) + 1;
                self.scan_tokens.insert(token, last.clone());
                Ok((token, batch))
            }
            _ => Ok((0, batch)),
        }
    }

    async fn info(&self, section: &str) -> StoreResult<String> {
        match section {
            "stats" => Ok(format!(
                "# Stats\r\nkeyspace_hits:{}\r\nkeyspace_misses:{}\r\n",
                self.hits.load(Ordering::Relaxed),
                self.misses.load(Ordering::Relaxed),
            )),
            other => Err(StoreError::backend(format!(
                "unsupported info section: {}",
                other
            ))),
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Redis-style glob matching supporting `*` and `?`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.as_bytes();
    let text = text.as_bytes();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip_with_expiry() {
        let store = MemoryStore::new();
        store
            .set_ex("k", b"v", Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_creates_and_counts() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("counter").await.unwrap(), 1);
        assert_eq!(store.incr("counter").await.unwrap(), 2);
        assert_eq!(store.incr("counter").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn incr_restarts_after_window_expiry() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("w").await.unwrap(), 1);
        assert!(store.expire("w", Duration::from_millis(20)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.incr("w").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn scan_pages_through_matches() {
        let store = MemoryStore::new();
        for i in 0..25 {
            store
                .set_ex(&format!("cache:item:{:02}", i), b"x", Duration::from_secs(60))
                .await
                .unwrap();
        }
        store
            .set_ex("other:thing", b"x", Duration::from_secs(60))
            .await
            .unwrap();

        let mut cursor = 0;
        let mut seen = Vec::new();
        loop {
            let (next, keys) = store.scan(cursor, "cache:item:*", 10).await.unwrap();
            seen.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(seen.len(), 25);
        assert!(seen.iter().all(|k| k.starts_with("cache:item:")));
    }

    #[tokio::test]
    async fn scan_cursor_is_stable_when_batches_are_deleted_between_rounds() {
        let store = MemoryStore::new();
        for i in 0..30 {
            store
                .set_ex(&format!("cache:item:{:02}", i), b"x", Duration::from_secs(60))
                .await
                .unwrap();
        }

        // Delete each batch before fetching the next round, the way pattern
        // invalidation drives the cursor.
        let mut cursor = 0;
        let mut seen = Vec::new();
        loop {
            let (next, keys) = store.scan(cursor, "cache:item:*", 10).await.unwrap();
            store.delete(&keys).await.unwrap();
            seen.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(seen.len(), 30);
        store.evict_expired();
        assert!(store.data.is_empty());
    }

    #[tokio::test]
    async fn stale_scan_cursors_report_completion() {
        let store = MemoryStore::new();
        store
            .set_ex("cache:a", b"x", Duration::from_secs(60))
            .await
            .unwrap();
        let (next, keys) = store.scan(99, "cache:*", 10).await.unwrap();
        assert_eq!(next, 0);
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn info_reports_hit_and_miss_counters() {
        let store = MemoryStore::new();
        store.set_ex("a", b"1", Duration::from_secs(60)).await.unwrap();
        store.get("a").await.unwrap();
        store.get("absent").await.unwrap();

        let blob = store.info("stats").await.unwrap();
        assert_eq!(super::super::parse_info_field(&blob, "keyspace_hits"), Some(1));
        assert_eq!(super::super::parse_info_field(&blob, "keyspace_misses"), Some(1));
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("cache:*", "cache:users:1"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("user:?", "user:a"));
        assert!(!glob_match("user:?", "user:ab"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("cache:*", "other:users"));
    }
}
