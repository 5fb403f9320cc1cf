//! # Fixed-Window Rate Limiter
//!
//! Per-(service, identifier) counters over the store's atomic increment. The
//! first increment of a window establishes its expiry; the counter then resets
//! lazily on the first increment after the window lapses. Two concurrent first
//! arrivals may both set the expiry, which is idempotent and accepted.
//!
//! On store failure the limiter fails open: availability is prioritized over
//! strict enforcement.

use crate::core::config::RateLimitSettings;
use crate::store::KeyValueStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-service fixed-window rate limiter.
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    settings: RateLimitSettings,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: RateLimitSettings) -> Self {
        Self { store, settings }
    }

    /// Returns `true` when the (service, identifier) pair has exceeded `limit`
    /// for the current window.
    pub async fn is_limited(&self, service: &str, identifier: &str, limit: u32) -> bool {
        let key = format!("{}{}:{}", self.settings.key_prefix, service, identifier);

        let count = match self.store.incr(&key).await {
            Ok(count) => count,
            Err(e) => {
                warn!(service = %service, error = %e, "rate limit store failure, failing open");
                return false;
            }
        };

        if count == 1 {
            // First arrival in this window establishes its expiry.
            if let Err(e) = self.store.expire(&key, self.settings.window).await {
                // A counter without an expiry never resets and would deny
                // forever once past the limit. Drop it and allow, so a later
                // first arrival can re-establish the window.
                warn!(service = %service, error = %e, "failed to set rate limit window expiry, dropping counter");
                if let Err(e) = self.store.delete(std::slice::from_ref(&key)).await {
                    warn!(service = %service, error = %e, "failed to drop windowless counter");
                }
                return false;
            }
        }

        let limited = count > limit as i64;
        if limited {
            debug!(service = %service, identifier = %identifier, count, limit, "rate limit exceeded");
        }
        limited
    }

    /// The default limit applied when a service carries no override.
    pub fn default_limit(&self) -> u32 {
        self.settings.default_limit
    }
}
