//! Observability: structured logging setup, the quorum-based uptime oracle,
//! and the sliding-window analytics aggregator.

pub mod analytics;
pub mod logging;
pub mod uptime;

pub use analytics::{Analytics, CacheOutcome, RequestEvent, Snapshot};
pub use logging::init_logging;
pub use uptime::{UptimeOracle, UptimeReport};
