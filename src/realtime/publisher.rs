//! Periodic analytics snapshot fan-out to realtime subscribers.

use super::registry::ConnectionRegistry;
use crate::observability::analytics::Analytics;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Spawn the background task that publishes an analytics snapshot to
/// `channel` every `period`. Subscribers receive it as a `channel_message`
/// frame; ticks with no subscribers publish to nobody and cost one summary.
pub fn spawn_snapshot_publisher(
    registry: Arc<ConnectionRegistry>,
    analytics: Arc<Analytics>,
    channel: String,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let snapshot = analytics.summarize().await;
            let payload = match serde_json::to_value(&snapshot) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "snapshot serialization failed");
                    continue;
                }
            };
            let delivered = registry.publish(&channel, payload);
            if delivered > 0 {
                debug!(channel = %channel, delivered, "published analytics snapshot");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::analytics::{CacheOutcome, RequestEvent};
    use chrono::Utc;
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn subscribers_receive_periodic_snapshots() {
        let registry = Arc::new(ConnectionRegistry::new());
        let analytics = Arc::new(Analytics::new(100));
        analytics
            .record(RequestEvent {
                timestamp: Utc::now(),
                method: "GET".into(),
                path: "/proxy/weather/current".into(),
                service: "weather".into(),
                status_code: 200,
                duration_ms: 12,
                cache_outcome: CacheOutcome::Miss,
            })
            .await;

        let mut rx = registry.register("c1", "127.0.0.1:40000".parse().unwrap());
        registry.subscribe("c1", "analytics");

        let handle = spawn_snapshot_publisher(
            registry.clone(),
            analytics,
            "analytics".to_string(),
            Duration::from_millis(20),
        );

        sleep(Duration::from_millis(70)).await;
        handle.abort();

        let mut snapshots = 0;
        while let Ok(message) = rx.try_recv() {
            if let crate::realtime::ServerMessage::ChannelMessage { channel, data } = message {
                assert_eq!(channel, "analytics");
                assert_eq!(data["overview"]["totalRequests"], 1);
                snapshots += 1;
            }
        }
        assert!(snapshots >= 2);
    }
}
