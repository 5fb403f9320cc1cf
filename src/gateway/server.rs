//! # HTTP Boundary
//!
//! Thin axum layer over the pipeline and its collaborators. Handlers do no
//! business logic beyond extraction and response shaping; everything
//! interesting lives behind [`AppState`].

use crate::caching::policy::{CacheEngine, CacheStats};
use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::gateway::pipeline::RequestPipeline;
use crate::observability::analytics::{Analytics, Snapshot};
use crate::realtime::socket::handle_socket;
use crate::realtime::ConnectionRegistry;
use crate::store::KeyValueStore;
use axum::{
    body::Body,
    extract::{ConnectInfo, Path, RawQuery, State, WebSocketUpgrade},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handler state. Every component is an explicitly owned instance
/// wired at startup; cloning is cheap (all `Arc`s).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub pipeline: Arc<RequestPipeline>,
    pub cache: Arc<CacheEngine>,
    pub analytics: Arc<Analytics>,
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<dyn KeyValueStore>,
}

/// Build the gateway router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/proxy/:service/*path", get(proxy))
        .route("/analytics", get(analytics_snapshot))
        .route("/analytics/reset", post(analytics_reset))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/:pattern", delete(cache_invalidate))
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(30))),
        )
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn serve(state: AppState, listen_addr: SocketAddr) -> GatewayResult<()> {
    let router = build_router(state);
    let listener = TcpListener::bind(listen_addr)
        .await
        .map_err(|e| GatewayError::internal(format!("failed to bind {}: {}", listen_addr, e)))?;
    info!(addr = %listen_addr, "gateway listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| GatewayError::internal(format!("server error: {}", e)))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}

async fn proxy(
    State(state): State<AppState>,
    Path((service, path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Response, GatewayError> {
    let identifier = addr.ip().to_string();
    let result = state
        .pipeline
        .proxy(&service, &path, query.as_deref(), &identifier)
        .await?;

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(result.data.status).unwrap_or(StatusCode::OK))
        .header("x-cache", if result.cached { "HIT" } else { "MISS" });
    if let Some(content_type) = &result.data.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder
        .body(Body::from(result.data.body))
        .map_err(|e| GatewayError::internal(format!("response build failed: {}", e)))
}

async fn analytics_snapshot(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.analytics.summarize().await)
}

async fn analytics_reset(State(state): State<AppState>) -> impl IntoResponse {
    state.analytics.reset().await;
    Json(json!({ "reset": true }))
}

async fn cache_stats(State(state): State<AppState>) -> Result<Json<CacheStats>, GatewayError> {
    Ok(Json(state.cache.stats().await?))
}

async fn cache_invalidate(
    State(state): State<AppState>,
    Path(pattern): Path<String>,
) -> Json<serde_json::Value> {
    let deleted = state.cache.invalidate_pattern(&pattern).await;
    Json(json!({ "pattern": pattern, "deleted": deleted }))
}

async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let registry = state.registry.clone();
    let settings = state.config.realtime.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, registry, settings, addr))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = state.store.ping().await.is_ok();
    let mut services: Vec<&String> = state.config.services.keys().collect();
    services.sort();
    let status = if store_ok { "ok" } else { "degraded" };
    let code = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "status": status,
            "store": store_ok,
            "services": services,
            "realtime": state.registry.stats(),
        })),
    )
}
