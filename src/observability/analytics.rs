//! # Analytics Aggregator
//!
//! Bounded sliding-window recorder of request outcomes. The window keeps the
//! most recent 1,000 records (FIFO eviction) while derived counters — per
//! endpoint, per service, per error signature, and cache hit/miss totals — are
//! maintained incrementally on every insert and evict, never recomputed from
//! the raw sequence. Snapshots compute percentiles by nearest rank and break
//! count ties by first-seen order.
//!
//! All state lives behind a single `RwLock`, so `reset` is atomic with respect
//! to concurrent `record` calls: no partially cleared state is observable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// How the cache treated a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    Hit,
    Miss,
    /// The request never consulted the cache (errors, rejections)
    Bypass,
}

/// One recorded request outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub service: String,
    pub status_code: u16,
    pub duration_ms: u64,
    pub cache_outcome: CacheOutcome,
}

impl RequestEvent {
    fn endpoint(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    fn error_signature(&self) -> Option<String> {
        (self.status_code >= 400).then(|| format!("{}: {}", self.status_code, self.path))
    }
}

/// A count slot carrying the insertion sequence of its first sighting, used as
/// the stable tie-breaker for top-N ordering.
#[derive(Debug, Clone)]
struct CounterSlot {
    count: u64,
    first_seen: u64,
}

#[derive(Default)]
struct WindowState {
    window: VecDeque<RequestEvent>,
    endpoints: HashMap<String, CounterSlot>,
    services: HashMap<String, CounterSlot>,
    errors: HashMap<String, CounterSlot>,
    cache_hits: u64,
    cache_misses: u64,
    sequence: u64,
}

impl WindowState {
    fn bump(map: &mut HashMap<String, CounterSlot>, key: String, sequence: u64) {
        map.entry(key)
            .and_modify(|slot| slot.count += 1)
            .or_insert(CounterSlot {
                count: 1,
                first_seen: sequence,
            });
    }

    fn drop_one(map: &mut HashMap<String, CounterSlot>, key: &str) {
        if let Some(slot) = map.get_mut(key) {
            slot.count -= 1;
            if slot.count == 0 {
                map.remove(key);
            }
        }
    }

    fn apply(&mut self, event: &RequestEvent) {
        let sequence = self.sequence;
        self.sequence += 1;
        Self::bump(&mut self.endpoints, event.endpoint(), sequence);
        Self::bump(&mut self.services, event.service.clone(), sequence);
        if let Some(signature) = event.error_signature() {
            Self::bump(&mut self.errors, signature, sequence);
        }
        match event.cache_outcome {
            CacheOutcome::Hit => self.cache_hits += 1,
            CacheOutcome::Miss => self.cache_misses += 1,
            CacheOutcome::Bypass => {}
        }
    }

    fn retract(&mut self, event: &RequestEvent) {
        Self::drop_one(&mut self.endpoints, &event.endpoint());
        Self::drop_one(&mut self.services, &event.service);
        if let Some(signature) = event.error_signature() {
            Self::drop_one(&mut self.errors, &signature);
        }
        match event.cache_outcome {
            CacheOutcome::Hit => self.cache_hits -= 1,
            CacheOutcome::Miss => self.cache_misses -= 1,
            CacheOutcome::Bypass => {}
        }
    }
}

/// Sliding-window analytics aggregator.
pub struct Analytics {
    capacity: usize,
    state: RwLock<WindowState>,
}

impl Analytics {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: RwLock::new(WindowState::default()),
        }
    }

    /// Append one outcome record, evicting the oldest when the window is full.
    pub async fn record(&self, event: RequestEvent) {
        let mut state = self.state.write().await;
        state.apply(&event);
        state.window.push_back(event);
        while state.window.len() > self.capacity {
            if let Some(evicted) = state.window.pop_front() {
                state.retract(&evicted);
            }
        }
    }

    /// Compute summary statistics from the current window contents.
    pub async fn summarize(&self) -> Snapshot {
        let state = self.state.read().await;
        let total = state.window.len();

        // Requests-per-minute from the newest (up to) 60 records.
        let recent_60: Vec<&RequestEvent> = state.window.iter().rev().take(60).collect();
        let requests_per_minute = if recent_60.len() < 2 {
            recent_60.len() as f64
        } else {
            let newest = recent_60.first().unwrap().timestamp;
            let oldest = recent_60.last().unwrap().timestamp;
            let elapsed_minutes =
                ((newest - oldest).num_milliseconds().max(0) as f64 / 60_000.0).max(1.0 / 60.0);
            recent_60.len() as f64 / elapsed_minutes
        };

        let mut durations: Vec<u64> = state.window.iter().map(|e| e.duration_ms).collect();
        durations.sort_unstable();
        let average = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<u64>() as f64 / durations.len() as f64
        };

        let cache_total = state.cache_hits + state.cache_misses;
        let cache_hit_rate = if cache_total == 0 {
            0.0
        } else {
            state.cache_hits as f64 / cache_total as f64 * 100.0
        };

        Snapshot {
            overview: Overview {
                total_requests: total,
                requests_per_minute,
                average_response_time_ms: average,
                cache_hit_rate,
                cache_hits: state.cache_hits,
                cache_misses: state.cache_misses,
            },
            response_times: ResponseTimes {
                average_ms: average,
                p50: nearest_rank(&durations, 0.50),
                p95: nearest_rank(&durations, 0.95),
                p99: nearest_rank(&durations, 0.99),
                min: durations.first().copied().unwrap_or(0),
                max: durations.last().copied().unwrap_or(0),
            },
            top_endpoints: top_n(&state.endpoints, 10),
            top_services: top_n(&state.services, 10),
            top_errors: top_n(&state.errors, 10),
            recent: state.window.iter().rev().take(20).cloned().collect(),
        }
    }

    /// Clear the window and all derived counters in one atomic step.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        *state = WindowState::default();
    }
}

/// Nearest-rank percentile over an ascending-sorted sample.
fn nearest_rank(sorted: &[u64], percentile: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = ((sorted.len() as f64 * percentile).floor() as usize).min(sorted.len() - 1);
    sorted[index]
}

/// Top N entries by descending count, ties broken by first-seen order.
fn top_n(map: &HashMap<String, CounterSlot>, n: usize) -> Vec<CountEntry> {
    let mut entries: Vec<(&String, &CounterSlot)> = map.iter().collect();
    entries.sort_by(|a, b| {
        b.1.count
            .cmp(&a.1.count)
            .then(a.1.first_seen.cmp(&b.1.first_seen))
    });
    entries
        .into_iter()
        .take(n)
        .map(|(name, slot)| CountEntry {
            name: name.clone(),
            count: slot.count,
        })
        .collect()
}

/// Point-in-time aggregation over the window. Field names are a stable wire
/// contract for dashboards and channel subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub overview: Overview,
    pub response_times: ResponseTimes,
    pub top_endpoints: Vec<CountEntry>,
    pub top_services: Vec<CountEntry>,
    pub top_errors: Vec<CountEntry>,
    pub recent: Vec<RequestEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_requests: usize,
    pub requests_per_minute: f64,
    pub average_response_time_ms: f64,
    pub cache_hit_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTimes {
    pub average_ms: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub min: u64,
    pub max: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountEntry {
    pub name: String,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn event(path: &str, status: u16, duration_ms: u64, outcome: CacheOutcome) -> RequestEvent {
        RequestEvent {
            timestamp: Utc::now(),
            method: "GET".into(),
            path: path.into(),
            service: path.trim_start_matches('/').split('/').next().unwrap().into(),
            status_code: status,
            duration_ms,
            cache_outcome: outcome,
        }
    }

    #[tokio::test]
    async fn window_never_exceeds_capacity_and_counts_track_retained() {
        let analytics = Analytics::new(1000);
        for i in 0..1200 {
            let path = format!("/svc/items/{}", i);
            analytics.record(event(&path, 200, 10, CacheOutcome::Miss)).await;
        }

        let snapshot = analytics.summarize().await;
        assert_eq!(snapshot.overview.total_requests, 1000);
        // The oldest 200 were evicted; their endpoint counters went with them.
        let state = analytics.state.read().await;
        assert_eq!(state.endpoints.len(), 1000);
        assert!(!state.endpoints.contains_key("GET /svc/items/0"));
        assert!(!state.endpoints.contains_key("GET /svc/items/199"));
        assert!(state.endpoints.contains_key("GET /svc/items/200"));
        assert_eq!(state.cache_misses, 1000);
    }

    #[tokio::test]
    async fn percentiles_match_nearest_rank_on_uniform_sample() {
        let analytics = Analytics::new(1000);
        // Uniform 0..999ms, shuffled insertion order must not matter.
        for i in (0..1000).rev() {
            analytics.record(event("/svc/x", 200, i, CacheOutcome::Hit)).await;
        }

        let snapshot = analytics.summarize().await;
        assert_eq!(snapshot.response_times.p50, 500);
        assert_eq!(snapshot.response_times.p95, 950);
        assert_eq!(snapshot.response_times.p99, 990);
        assert_eq!(snapshot.response_times.min, 0);
        assert_eq!(snapshot.response_times.max, 999);
        assert!((snapshot.response_times.average_ms - 499.5).abs() < 0.001);
    }

    #[tokio::test]
    async fn top_lists_order_by_count_with_first_seen_tiebreak() {
        let analytics = Analytics::new(1000);
        analytics.record(event("/beta/x", 200, 1, CacheOutcome::Hit)).await;
        analytics.record(event("/alpha/x", 200, 1, CacheOutcome::Hit)).await;
        analytics.record(event("/alpha/x", 200, 1, CacheOutcome::Hit)).await;
        analytics.record(event("/gamma/x", 200, 1, CacheOutcome::Hit)).await;

        let snapshot = analytics.summarize().await;
        let services: Vec<&str> = snapshot
            .top_services
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        // alpha leads on count; beta beats gamma on first-seen order.
        assert_eq!(services, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn error_signatures_count_status_and_path() {
        let analytics = Analytics::new(1000);
        analytics.record(event("/svc/a", 500, 5, CacheOutcome::Bypass)).await;
        analytics.record(event("/svc/a", 500, 5, CacheOutcome::Bypass)).await;
        analytics.record(event("/svc/b", 404, 5, CacheOutcome::Bypass)).await;
        analytics.record(event("/svc/c", 200, 5, CacheOutcome::Hit)).await;

        let snapshot = analytics.summarize().await;
        assert_eq!(snapshot.top_errors.len(), 2);
        assert_eq!(snapshot.top_errors[0].name, "500: /svc/a");
        assert_eq!(snapshot.top_errors[0].count, 2);
        assert_eq!(snapshot.top_errors[1].name, "404: /svc/b");
    }

    #[tokio::test]
    async fn cache_hit_rate_from_outcomes() {
        let analytics = Analytics::new(1000);
        analytics.record(event("/svc/a", 200, 1, CacheOutcome::Hit)).await;
        analytics.record(event("/svc/a", 200, 1, CacheOutcome::Hit)).await;
        analytics.record(event("/svc/a", 200, 1, CacheOutcome::Hit)).await;
        analytics.record(event("/svc/a", 200, 1, CacheOutcome::Miss)).await;
        // Bypass records do not enter the hit rate.
        analytics.record(event("/svc/a", 429, 0, CacheOutcome::Bypass)).await;

        let snapshot = analytics.summarize().await;
        assert_eq!(snapshot.overview.cache_hit_rate, 75.0);
    }

    #[tokio::test]
    async fn requests_per_minute_handles_sparse_windows() {
        let analytics = Analytics::new(1000);
        // Zero and one record: elapsed minutes treated as 1.
        assert_eq!(analytics.summarize().await.overview.requests_per_minute, 0.0);
        analytics.record(event("/svc/a", 200, 1, CacheOutcome::Hit)).await;
        assert_eq!(analytics.summarize().await.overview.requests_per_minute, 1.0);
    }

    #[tokio::test]
    async fn requests_per_minute_uses_recent_timestamps() {
        let analytics = Analytics::new(1000);
        let base = Utc::now();
        for i in 0..30 {
            let mut e = event("/svc/a", 200, 1, CacheOutcome::Hit);
            e.timestamp = base + ChronoDuration::seconds(i * 2);
            analytics.record(e).await;
        }
        // 30 records over 58 seconds, clamped math lands near 30/min.
        let rpm = analytics.summarize().await.overview.requests_per_minute;
        assert!((rpm - 30.0 / (58.0 / 60.0)).abs() < 0.5);
    }

    #[tokio::test]
    async fn recent_lists_newest_first_capped_at_twenty() {
        let analytics = Analytics::new(1000);
        for i in 0..25 {
            analytics
                .record(event(&format!("/svc/{}", i), 200, 1, CacheOutcome::Hit))
                .await;
        }
        let snapshot = analytics.summarize().await;
        assert_eq!(snapshot.recent.len(), 20);
        assert_eq!(snapshot.recent[0].path, "/svc/24");
        assert_eq!(snapshot.recent[19].path, "/svc/5");
    }

    #[tokio::test]
    async fn reset_clears_window_and_counters() {
        let analytics = Analytics::new(1000);
        for _ in 0..10 {
            analytics.record(event("/svc/a", 500, 1, CacheOutcome::Miss)).await;
        }
        analytics.reset().await;

        let snapshot = analytics.summarize().await;
        assert_eq!(snapshot.overview.total_requests, 0);
        assert!(snapshot.top_endpoints.is_empty());
        assert!(snapshot.top_errors.is_empty());
        assert_eq!(snapshot.overview.cache_misses, 0);
    }
}
