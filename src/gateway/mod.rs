//! # Gateway Composition
//!
//! The request pipeline that chains the traffic, uptime, and caching
//! components, and the thin HTTP boundary that exposes it.

pub mod pipeline;
pub mod server;

pub use pipeline::{RequestPipeline, UpstreamPayload};
pub use server::{build_router, serve, AppState};
