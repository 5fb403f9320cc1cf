//! # Request Pipeline
//!
//! Composition root for a proxied request. The stages run in a fixed order:
//! service lookup, rate limiter, uptime oracle, then the cached upstream
//! fetch. Every outcome, success or failure, is recorded into the analytics
//! window with its cache disposition; rejected and failed requests record a
//! `Bypass` since they never consulted the cache.
//!
//! All collaborators are owned instances injected at construction. The
//! pipeline holds no global state and can be instantiated per test.

use crate::caching::key::{parse_query, request_key};
use crate::caching::policy::{CacheEngine, Cached};
use crate::core::config::{CachePolicyKind, GatewayConfig, ServiceConfig};
use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::analytics::{Analytics, CacheOutcome, RequestEvent};
use crate::observability::uptime::UptimeOracle;
use crate::traffic::rate_limit::RateLimiter;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Upstream response captured for caching and replay. Status and content type
/// travel with the body so a cache hit reproduces the original response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpstreamPayload {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// The proxied request pipeline.
pub struct RequestPipeline {
    config: Arc<GatewayConfig>,
    cache: Arc<CacheEngine>,
    limiter: Arc<RateLimiter>,
    oracle: Arc<UptimeOracle>,
    analytics: Arc<Analytics>,
    client: Client,
}

impl RequestPipeline {
    pub fn new(
        config: Arc<GatewayConfig>,
        cache: Arc<CacheEngine>,
        limiter: Arc<RateLimiter>,
        oracle: Arc<UptimeOracle>,
        analytics: Arc<Analytics>,
        client: Client,
    ) -> Self {
        Self {
            config,
            cache,
            limiter,
            oracle,
            analytics,
            client,
        }
    }

    /// Run one proxied GET through the full pipeline. `identifier` scopes the
    /// rate limit (one counter per service/identifier pair).
    pub async fn proxy(
        &self,
        service_name: &str,
        path: &str,
        raw_query: Option<&str>,
        identifier: &str,
    ) -> GatewayResult<Cached<UpstreamPayload>> {
        let started = Instant::now();
        let result = self
            .proxy_inner(service_name, path, raw_query, identifier)
            .await;

        let (status, outcome) = match &result {
            Ok(response) => (
                response.data.status,
                if response.cached {
                    CacheOutcome::Hit
                } else {
                    CacheOutcome::Miss
                },
            ),
            Err(e) => (e.signature_status(), CacheOutcome::Bypass),
        };
        self.analytics
            .record(RequestEvent {
                timestamp: Utc::now(),
                method: "GET".to_string(),
                path: format!("/proxy/{}/{}", service_name, path),
                service: service_name.to_string(),
                status_code: status,
                duration_ms: started.elapsed().as_millis() as u64,
                cache_outcome: outcome,
            })
            .await;

        result
    }

    async fn proxy_inner(
        &self,
        service_name: &str,
        path: &str,
        raw_query: Option<&str>,
        identifier: &str,
    ) -> GatewayResult<Cached<UpstreamPayload>> {
        let service =
            self.config
                .services
                .get(service_name)
                .ok_or_else(|| GatewayError::UnknownService {
                    service: service_name.to_string(),
                })?;

        let limit = self.config.rate_limit_for(service);
        if self.limiter.is_limited(service_name, identifier, limit).await {
            return Err(GatewayError::RateLimitExceeded {
                service: service_name.to_string(),
                limit,
            });
        }

        let report = self.oracle.verify(&service.base_url).await;
        if !report.up {
            info!(
                service = %service_name,
                up_percent = report.up_percent,
                "quorum check failed, refusing to proxy"
            );
            return Err(GatewayError::ServiceUnavailable {
                service: service_name.to_string(),
                up_percent: report.up_percent,
            });
        }

        let params = parse_query(raw_query);
        let key = request_key(
            &self.config.cache.key_prefix,
            service_name,
            path,
            &params,
        );
        let ttl = self.config.cache_ttl_for(service);
        let policy = self.config.cache_policy_for(service);
        debug!(service = %service_name, key = %key, ?policy, "dispatching through cache");

        let url = upstream_url(service, path, raw_query);
        let client = self.client.clone();
        let timeout = service.timeout;
        let produce = move || fetch_upstream(client, url, timeout);
        match policy {
            CachePolicyKind::CacheAside => self.cache.cache_aside(&key, ttl, produce).await,
            CachePolicyKind::RefreshAhead => self.cache.refresh_ahead(&key, ttl, produce).await,
        }
    }
}

fn upstream_url(service: &ServiceConfig, path: &str, raw_query: Option<&str>) -> String {
    let base = service.base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    match raw_query {
        Some(query) if !query.is_empty() => format!("{}/{}?{}", base, path, query),
        _ => format!("{}/{}", base, path),
    }
}

/// Fetch from the upstream. Error statuses become `Upstream` errors so the
/// cache never stores a failure response.
async fn fetch_upstream(
    client: Client,
    url: String,
    timeout: std::time::Duration,
) -> GatewayResult<UpstreamPayload> {
    let response = client
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            let status = if e.is_timeout() { 504 } else { 502 };
            GatewayError::Upstream {
                status,
                message: e.to_string(),
            }
        })?;

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());
    let body = response.text().await.map_err(|e| GatewayError::Upstream {
        status: 502,
        message: format!("failed to read upstream body: {}", e),
    })?;

    if status >= 400 {
        return Err(GatewayError::Upstream {
            status,
            message: body,
        });
    }

    Ok(UpstreamPayload {
        status,
        content_type,
        body,
    })
}
