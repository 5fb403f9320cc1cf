//! # Cache Policy Engine
//!
//! Interchangeable caching strategies over the shared key-value store:
//! cache-aside, write-through, write-behind, and refresh-ahead, plus a bounded
//! multi-level accessor, glob pattern invalidation, and store-sourced hit/miss
//! statistics.
//!
//! Error policy: every read and write against the store is independently
//! fault-tolerant. A store outage degrades caching to pass-through; it never
//! turns into a request failure.

pub mod key;
pub mod multi_level;
pub mod policy;

pub use key::request_key;
pub use multi_level::MultiLevelCache;
pub use policy::{CacheEngine, CacheStats, Cached};
