//! # Relay Gateway - Core Library Crate
//!
//! A request-proxying gateway that fronts third-party HTTP services with caching,
//! per-service rate limiting, liveness verification, and live operational analytics
//! broadcast to WebSocket observers.
//!
//! The crate is organized around a small set of cooperating components, each owned
//! explicitly and injected at startup rather than living in ambient globals:
//! - [`store`]: the shared key-value store boundary (Redis or in-memory)
//! - [`caching`]: interchangeable cache policies built on the store
//! - [`traffic`]: the fixed-window rate limiter
//! - [`observability`]: logging setup, the uptime oracle, and the analytics window
//! - [`realtime`]: the connection/room/channel registry and WebSocket handler
//! - [`gateway`]: the request pipeline composition root and the thin HTTP boundary

/// Error types, result alias, and gateway configuration
pub mod core;

/// Key-value store abstraction with Redis and in-memory backends
pub mod store;

/// Cache policy engine: cache-aside, write-through, write-behind, refresh-ahead,
/// multi-level access, and pattern invalidation
pub mod caching;

/// Traffic management: per-service fixed-window rate limiting
pub mod traffic;

/// Observability: structured logging, quorum liveness probes, request analytics
pub mod observability;

/// Realtime broadcasting: connection registry, rooms, channels, snapshot publishing
pub mod realtime;

/// Request pipeline and HTTP server boundary
pub mod gateway;

pub use crate::core::config::{GatewayConfig, ServiceConfig};
pub use crate::core::error::{GatewayError, GatewayResult};
pub use crate::gateway::pipeline::RequestPipeline;
pub use crate::gateway::server::{build_router, AppState};
