//! Traffic management: the per-service fixed-window rate limiter.

pub mod rate_limit;

pub use rate_limit::RateLimiter;
