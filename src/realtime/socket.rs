//! # WebSocket Connection Task
//!
//! One task per upgraded connection. The task owns the socket and runs a
//! select loop over three sources: frames arriving from the client, outbound
//! messages queued in the registry, and the liveness ping timer. All state
//! changes go through the [`ConnectionRegistry`]; the task itself only parses,
//! dispatches, and writes.

use super::message::{ClientMessage, ServerMessage};
use super::registry::ConnectionRegistry;
use crate::core::config::RealtimeSettings;
use axum::extract::ws::{Message, WebSocket};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Drive a freshly upgraded socket until the client disconnects, the write
/// side fails, or the liveness check gives up on it.
pub async fn handle_socket(
    mut socket: WebSocket,
    registry: Arc<ConnectionRegistry>,
    settings: RealtimeSettings,
    remote_addr: SocketAddr,
) {
    let connection_id = Uuid::new_v4().to_string();
    let mut outbound = registry.register(&connection_id, remote_addr);

    let mut ping_interval = tokio::time::interval(settings.ping_interval);
    // The first tick fires immediately; consume it so the ping cadence starts
    // one full interval after connect.
    ping_interval.tick().await;
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        awaiting_pong = false;
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => dispatch(&connection_id, message, &registry),
                            Err(e) => {
                                // Malformed frames earn an error envelope,
                                // never a disconnect.
                                registry.send_to(
                                    &connection_id,
                                    ServerMessage::Error {
                                        message: format!("invalid message: {}", e),
                                    },
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        registry.send_to(
                            &connection_id,
                            ServerMessage::Error {
                                message: "binary frames are not supported".to_string(),
                            },
                        );
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(connection_id = %connection_id, "client closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "socket error");
                        break;
                    }
                }
            }

            queued = outbound.recv() => {
                match queued {
                    Some(message) => {
                        let text = match serde_json::to_string(&message) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(connection_id = %connection_id, error = %e, "frame serialization failed");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    // Registry dropped the sender: the connection was
                    // disconnected out from under us.
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if awaiting_pong {
                    warn!(connection_id = %connection_id, "liveness ping unanswered, closing");
                    break;
                }
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }
        }
    }

    registry.disconnect(&connection_id);
}

fn dispatch(connection_id: &str, message: ClientMessage, registry: &ConnectionRegistry) {
    match message {
        ClientMessage::Ping => {
            registry.send_to(connection_id, ServerMessage::Pong);
        }
        // Application-level pong; counts as liveness in the recv arm already.
        ClientMessage::Pong => {}
        ClientMessage::Subscribe { channel } => {
            registry.subscribe(connection_id, &channel);
        }
        ClientMessage::Unsubscribe { channel } => {
            registry.unsubscribe(connection_id, &channel);
        }
        ClientMessage::JoinRoom { room } => {
            registry.join_room(connection_id, &room);
        }
        ClientMessage::LeaveRoom { room } => {
            registry.leave_room(connection_id, &room);
        }
        ClientMessage::Broadcast { room: Some(room), data } => {
            if registry.broadcast_room(connection_id, &room, data).is_none() {
                registry.send_to(
                    connection_id,
                    ServerMessage::Error {
                        message: format!("unknown room: {}", room),
                    },
                );
            }
        }
        ClientMessage::Broadcast { room: None, data } => {
            registry.broadcast(connection_id, data);
        }
        ClientMessage::DirectMessage { to, data } => {
            if !registry.direct(connection_id, &to, data) {
                registry.send_to(
                    connection_id,
                    ServerMessage::Error {
                        message: format!("unknown connection: {}", to),
                    },
                );
            }
        }
    }
}
