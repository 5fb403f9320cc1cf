//! # Structured Logging
//!
//! Tracing subscriber setup. Log levels come from `RUST_LOG` with an `info`
//! default; components attach structured fields (`service = %name`,
//! `connection_id = %id`) rather than formatting them into messages.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber. Safe to call once at startup.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
