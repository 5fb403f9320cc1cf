//! # Uptime Oracle
//!
//! Quorum-based liveness judgment for upstream services. Each verification
//! issues a batch of independent probes concurrently, waits for all of them to
//! settle (no short-circuit), and reports the service up when the success
//! percentage clears the threshold. Nothing is persisted between calls: this
//! is a point-in-time judgment, not a tracked entity.

use crate::core::config::UptimeSettings;
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome of one quorum verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UptimeReport {
    /// True when `up_percent` meets the configured threshold
    pub up: bool,
    /// Percentage of probes that succeeded, rounded to two decimals
    pub up_percent: f64,
    /// Number of probes issued
    pub checks: u32,
}

/// Stateless quorum liveness prober.
pub struct UptimeOracle {
    client: Client,
    settings: UptimeSettings,
}

impl UptimeOracle {
    pub fn new(client: Client, settings: UptimeSettings) -> Self {
        Self { client, settings }
    }

    /// Probe `url` with the configured number of checks.
    pub async fn verify(&self, url: &str) -> UptimeReport {
        self.verify_with(url, self.settings.checks).await
    }

    /// Probe `url` with an explicit number of checks. A probe succeeds when a
    /// response arrives within the timeout with a status below 500; network
    /// errors and timeouts count as failures.
    pub async fn verify_with(&self, url: &str, checks: u32) -> UptimeReport {
        let checks = checks.max(1);
        let probes = (0..checks).map(|_| self.probe(url));
        let results = join_all(probes).await;

        let successes = results.iter().filter(|ok| **ok).count() as u32;
        let up_percent = (successes as f64 / checks as f64 * 10_000.0).round() / 100.0;
        let up = up_percent >= self.settings.up_threshold;

        debug!(url = %url, successes, checks, up_percent, "uptime verification");
        UptimeReport {
            up,
            up_percent,
            checks,
        }
    }

    async fn probe(&self, url: &str) -> bool {
        let request = self.client.get(url).timeout(self.settings.probe_timeout);
        match request.send().await {
            Ok(response) => response.status().as_u16() < 500,
            Err(_) => false,
        }
    }
}
