//! # Realtime Broadcaster
//!
//! Connection/room/channel registry plus the WebSocket handler that feeds it.
//! Rooms are membership-bound (created on first join, deleted when empty);
//! channels are looser subscriptions used for fan-out of analytics snapshots.
//! The registry is the sole owner of connection state: the socket task feeds
//! it events and drains the per-connection outbound queue.

pub mod message;
pub mod publisher;
pub mod registry;
pub mod socket;

pub use message::{ClientMessage, ServerMessage};
pub use publisher::spawn_snapshot_publisher;
pub use registry::{ConnectionRegistry, RegistryStats};
