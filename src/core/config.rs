//! # Gateway Configuration
//!
//! YAML-backed configuration for the gateway core. The configuration surface is
//! deliberately small: listen address, store location, per-component tuning, and
//! the map of fronted services with their `{rate_limit, cache_ttl, timeout}`
//! overrides. Components receive their settings at construction time; nothing
//! re-reads configuration at runtime.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use url::Url;

use super::error::{GatewayError, GatewayResult};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the HTTP boundary binds to
    pub listen_addr: SocketAddr,

    /// Redis connection URL; when absent the gateway runs on the in-memory store
    pub redis_url: Option<String>,

    /// Cache policy engine settings
    pub cache: CacheSettings,

    /// Rate limiter settings
    pub rate_limit: RateLimitSettings,

    /// Uptime oracle settings
    pub uptime: UptimeSettings,

    /// Analytics window and snapshot publishing settings
    pub analytics: AnalyticsSettings,

    /// Realtime broadcaster settings
    pub realtime: RealtimeSettings,

    /// Fronted services, keyed by the name used in proxy paths
    pub services: HashMap<String, ServiceConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".parse().unwrap(),
            redis_url: None,
            cache: CacheSettings::default(),
            rate_limit: RateLimitSettings::default(),
            uptime: UptimeSettings::default(),
            analytics: AnalyticsSettings::default(),
            realtime: RealtimeSettings::default(),
            services: HashMap::new(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GatewayError::configuration(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse configuration from a YAML string and validate it.
    pub fn from_yaml(raw: &str) -> GatewayResult<Self> {
        let config: Self = serde_yaml::from_str(raw)
            .map_err(|e| GatewayError::configuration(format!("invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants that serde cannot express.
    pub fn validate(&self) -> GatewayResult<()> {
        for (name, service) in &self.services {
            Url::parse(&service.base_url).map_err(|e| {
                GatewayError::configuration(format!(
                    "service {} has invalid base_url {}: {}",
                    name, service.base_url, e
                ))
            })?;
        }
        if !(0.0..=1.0).contains(&self.cache.refresh_threshold) {
            return Err(GatewayError::configuration(
                "cache.refresh_threshold must be within [0.0, 1.0]",
            ));
        }
        Ok(())
    }

    /// Effective rate limit for a service (per-service override or default).
    pub fn rate_limit_for(&self, service: &ServiceConfig) -> u32 {
        service.rate_limit.unwrap_or(self.rate_limit.default_limit)
    }

    /// Effective cache TTL for a service (per-service override or default).
    pub fn cache_ttl_for(&self, service: &ServiceConfig) -> Duration {
        service.cache_ttl.unwrap_or(self.cache.default_ttl)
    }

    /// Effective read policy for a service (per-service override or default).
    pub fn cache_policy_for(&self, service: &ServiceConfig) -> CachePolicyKind {
        service.cache_policy.unwrap_or(self.cache.policy)
    }
}

/// Per-service configuration supplied by the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Upstream base URL this service proxies to
    pub base_url: String,

    /// Requests allowed per rate-limit window; falls back to the global default
    pub rate_limit: Option<u32>,

    /// Cache TTL for responses; falls back to the global default
    #[serde(default, with = "humantime_serde::option")]
    pub cache_ttl: Option<Duration>,

    /// Read policy for proxied responses; falls back to the global default
    #[serde(default)]
    pub cache_policy: Option<CachePolicyKind>,

    /// Upstream request timeout
    #[serde(default = "default_service_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_service_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Read policy the pipeline applies when proxying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicyKind {
    /// Read the cache, fetch and populate on miss
    CacheAside,
    /// Cache-aside plus a background re-fetch when a hit nears expiry
    RefreshAhead,
}

/// Cache policy engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Default TTL applied when a service has no override
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// Default read policy when a service has no override
    pub policy: CachePolicyKind,

    /// Key prefix for all cache entries in the store
    pub key_prefix: String,

    /// Bounded local promotion cache capacity (multi-level L1)
    pub l1_capacity: usize,

    /// Fixed short TTL for L1 promotions
    #[serde(with = "humantime_serde")]
    pub l1_ttl: Duration,

    /// Share one upstream fetch between concurrent misses on the same key.
    /// Off by default: independent re-fetch is the documented behavior.
    pub coalesce_misses: bool,

    /// Refresh-ahead threshold: a hit whose remaining TTL fraction is below
    /// `1 - refresh_threshold` triggers a background refresh
    pub refresh_threshold: f64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            policy: CachePolicyKind::CacheAside,
            key_prefix: "cache:".to_string(),
            l1_capacity: 100,
            l1_ttl: Duration::from_secs(30),
            coalesce_misses: false,
            refresh_threshold: 0.8,
        }
    }
}

/// Rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Requests allowed per window when a service has no override
    pub default_limit: u32,

    /// Fixed window duration
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Key prefix for rate-limit counters in the store
    pub key_prefix: String,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            default_limit: 100,
            window: Duration::from_secs(60),
            key_prefix: "ratelimit:".to_string(),
        }
    }
}

/// Uptime oracle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UptimeSettings {
    /// Number of independent probes per verification
    pub checks: u32,

    /// Timeout applied to each individual probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Percentage of probes that must succeed for the service to count as up
    pub up_threshold: f64,
}

impl Default for UptimeSettings {
    fn default() -> Self {
        Self {
            checks: 3,
            probe_timeout: Duration::from_secs(3),
            up_threshold: 66.0,
        }
    }
}

/// Analytics aggregator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsSettings {
    /// Sliding window capacity in records
    pub window_capacity: usize,

    /// Interval between snapshot publications to the realtime channel
    #[serde(with = "humantime_serde")]
    pub publish_interval: Duration,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            window_capacity: 1000,
            publish_interval: Duration::from_secs(10),
        }
    }
}

/// Realtime broadcaster settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSettings {
    /// Interval between liveness pings; a connection that has not answered the
    /// previous ping by the next tick is forcibly closed
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,

    /// Well-known channel analytics snapshots are published to
    pub analytics_channel: String,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            analytics_channel: "analytics".to_string(),
        }
    }
}
