//! # Relay Gateway - Main Entry Point
//!
//! Startup wires the component graph explicitly: the store backend is chosen
//! from configuration, every component receives its collaborators at
//! construction, and nothing lives in ambient globals. The process serves
//! until ctrl-c.

use relay_gateway::caching::policy::CacheEngine;
use relay_gateway::gateway::pipeline::RequestPipeline;
use relay_gateway::gateway::server::{serve, AppState};
use relay_gateway::observability::analytics::Analytics;
use relay_gateway::observability::logging::init_logging;
use relay_gateway::observability::uptime::UptimeOracle;
use relay_gateway::realtime::{spawn_snapshot_publisher, ConnectionRegistry};
use relay_gateway::store::{KeyValueStore, MemoryStore, RedisStore, RedisStoreConfig};
use relay_gateway::traffic::rate_limit::RateLimiter;
use relay_gateway::{GatewayConfig, GatewayResult};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> GatewayResult<()> {
    init_logging();

    let config = load_config()?;
    info!(
        listen_addr = %config.listen_addr,
        services = config.services.len(),
        "starting relay gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = Arc::new(config);
    let store = build_store(&config).await;

    let cache = Arc::new(CacheEngine::new(store.clone(), config.cache.clone()));
    let limiter = Arc::new(RateLimiter::new(store.clone(), config.rate_limit.clone()));
    let oracle = Arc::new(UptimeOracle::new(
        reqwest::Client::new(),
        config.uptime.clone(),
    ));
    let analytics = Arc::new(Analytics::new(config.analytics.window_capacity));
    let registry = Arc::new(ConnectionRegistry::new());

    let pipeline = Arc::new(RequestPipeline::new(
        config.clone(),
        cache.clone(),
        limiter,
        oracle,
        analytics.clone(),
        reqwest::Client::new(),
    ));

    let publisher = spawn_snapshot_publisher(
        registry.clone(),
        analytics.clone(),
        config.realtime.analytics_channel.clone(),
        config.analytics.publish_interval,
    );

    let state = AppState {
        config: config.clone(),
        pipeline,
        cache,
        analytics,
        registry,
        store,
    };

    let result = serve(state, config.listen_addr).await;
    publisher.abort();
    info!("relay gateway stopped");
    result
}

/// Load configuration from `RELAY_CONFIG` when set, falling back to
/// `config.yaml` in the working directory, then to built-in defaults.
fn load_config() -> GatewayResult<GatewayConfig> {
    if let Ok(path) = std::env::var("RELAY_CONFIG") {
        info!(path = %path, "loading configuration");
        return GatewayConfig::from_file(path);
    }
    if std::path::Path::new("config.yaml").exists() {
        info!("loading configuration from ./config.yaml");
        return GatewayConfig::from_file("config.yaml");
    }
    warn!("no configuration file found, using defaults (no services registered)");
    Ok(GatewayConfig::default())
}

/// Pick the store backend: Redis when a URL is configured and reachable,
/// otherwise the in-memory store.
async fn build_store(config: &GatewayConfig) -> Arc<dyn KeyValueStore> {
    if let Some(url) = &config.redis_url {
        match RedisStore::connect(RedisStoreConfig {
            url: url.clone(),
            ..Default::default()
        })
        .await
        {
            Ok(store) => return Arc::new(store),
            Err(e) => {
                warn!(url = %url, error = %e, "redis unavailable, falling back to in-memory store");
            }
        }
    } else {
        info!("no redis_url configured, using in-memory store");
    }
    Arc::new(MemoryStore::new())
}
