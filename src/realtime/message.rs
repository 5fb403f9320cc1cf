//! # Realtime Wire Protocol
//!
//! JSON message envelopes exchanged over the WebSocket. Every frame is an
//! object with a `type` tag; unknown or malformed frames earn the sender an
//! `error` envelope, never a disconnect.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames a client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    Pong,
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    JoinRoom { room: String },
    LeaveRoom { room: String },
    /// With `room` set, broadcast to that room excluding the sender;
    /// without, broadcast to every other open connection.
    Broadcast {
        #[serde(default)]
        room: Option<String>,
        data: Value,
    },
    DirectMessage { to: String, data: Value },
}

/// Frames the server pushes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome { connection_id: String },
    Pong,
    ChannelMessage { channel: String, data: Value },
    RoomJoined { room: String, members: Vec<String> },
    RoomLeft { room: String, members: Vec<String> },
    RoomMemberJoined { room: String, member: String, members: Vec<String> },
    RoomMemberLeft { room: String, member: String, members: Vec<String> },
    DirectMessage { from: String, data: Value },
    Broadcast { from: String, room: Option<String>, data: Value },
    Error { message: String },
}
