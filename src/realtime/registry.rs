//! # Connection Registry
//!
//! Owns all realtime connection state: the connection table, room membership,
//! and channel subscriptions. Delivery goes through per-connection unbounded
//! senders, so registry operations never block on a slow socket; a connection
//! whose receiver is gone simply stops receiving.
//!
//! Rooms are created on the first join and deleted when the last member
//! leaves — no orphan rooms persist. Disconnecting removes the connection from
//! every room and channel it occupied before dropping its sender.

use super::message::ServerMessage;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, info};

struct Connection {
    remote_addr: SocketAddr,
    connected_at: DateTime<Utc>,
    rooms: HashSet<String>,
    channels: HashSet<String>,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

/// Registry-wide counters for health reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub connections: usize,
    pub rooms: usize,
    pub channels: usize,
}

/// Connection/room/channel registry.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Connection>,
    // Member lists keep join order so membership snapshots are stable.
    rooms: DashMap<String, Vec<String>>,
    channels: DashMap<String, Vec<String>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an opening connection and hand back its outbound queue. The
    /// welcome acknowledgment is queued before anything else can be delivered.
    pub fn register(
        &self,
        id: &str,
        remote_addr: SocketAddr,
    ) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let connection = Connection {
            remote_addr,
            connected_at: Utc::now(),
            rooms: HashSet::new(),
            channels: HashSet::new(),
            sender,
        };
        self.connections.insert(id.to_string(), connection);
        self.send_to(
            id,
            ServerMessage::Welcome {
                connection_id: id.to_string(),
            },
        );
        info!(connection_id = %id, remote_addr = %remote_addr, "connection registered");
        receiver
    }

    /// Queue a message for one connection. Returns false when the connection
    /// is unknown or its receiver is gone.
    pub fn send_to(&self, id: &str, message: ServerMessage) -> bool {
        match self.connections.get(id) {
            Some(connection) => connection.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Join a room, creating it on first join. The joiner receives
    /// `room_joined` with the full member list; existing members receive
    /// `room_member_joined`.
    pub fn join_room(&self, id: &str, room: &str) {
        if !self.connections.contains_key(id) {
            return;
        }
        let members = {
            let mut members = self.rooms.entry(room.to_string()).or_default();
            if !members.iter().any(|m| m == id) {
                members.push(id.to_string());
            }
            members.clone()
        };
        if let Some(mut connection) = self.connections.get_mut(id) {
            connection.rooms.insert(room.to_string());
        }

        debug!(connection_id = %id, room = %room, members = members.len(), "joined room");
        for member in &members {
            if member == id {
                self.send_to(
                    member,
                    ServerMessage::RoomJoined {
                        room: room.to_string(),
                        members: members.clone(),
                    },
                );
            } else {
                self.send_to(
                    member,
                    ServerMessage::RoomMemberJoined {
                        room: room.to_string(),
                        member: id.to_string(),
                        members: members.clone(),
                    },
                );
            }
        }
    }

    /// Leave a room. The leaver receives `room_left`; remaining members
    /// receive `room_member_left`. A room left empty is deleted.
    pub fn leave_room(&self, id: &str, room: &str) {
        let remaining = self.remove_membership(id, room);
        let Some(remaining) = remaining else {
            return;
        };
        if let Some(mut connection) = self.connections.get_mut(id) {
            connection.rooms.remove(room);
        }

        self.send_to(
            id,
            ServerMessage::RoomLeft {
                room: room.to_string(),
                members: remaining.clone(),
            },
        );
        for member in &remaining {
            self.send_to(
                member,
                ServerMessage::RoomMemberLeft {
                    room: room.to_string(),
                    member: id.to_string(),
                    members: remaining.clone(),
                },
            );
        }
    }

    /// Subscribe to a channel. Channels have no owning lifecycle beyond the
    /// connection's own; no notifications are sent.
    pub fn subscribe(&self, id: &str, channel: &str) {
        if !self.connections.contains_key(id) {
            return;
        }
        {
            let mut subscribers = self.channels.entry(channel.to_string()).or_default();
            if !subscribers.iter().any(|s| s == id) {
                subscribers.push(id.to_string());
            }
        }
        if let Some(mut connection) = self.connections.get_mut(id) {
            connection.channels.insert(channel.to_string());
        }
        debug!(connection_id = %id, channel = %channel, "subscribed");
    }

    /// Unsubscribe from a channel, dropping the channel entry when empty.
    pub fn unsubscribe(&self, id: &str, channel: &str) {
        self.remove_subscription(id, channel);
        if let Some(mut connection) = self.connections.get_mut(id) {
            connection.channels.remove(channel);
        }
    }

    /// Publish to every subscriber of a channel. Returns the delivery count.
    pub fn publish(&self, channel: &str, data: Value) -> usize {
        let subscribers = match self.channels.get(channel) {
            Some(subscribers) => subscribers.clone(),
            None => return 0,
        };
        let mut delivered = 0;
        for subscriber in subscribers {
            let frame = ServerMessage::ChannelMessage {
                channel: channel.to_string(),
                data: data.clone(),
            };
            if self.send_to(&subscriber, frame) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Direct message between connections. Returns false when the target is
    /// unknown.
    pub fn direct(&self, from: &str, to: &str, data: Value) -> bool {
        self.send_to(
            to,
            ServerMessage::DirectMessage {
                from: from.to_string(),
                data,
            },
        )
    }

    /// Broadcast to every open connection except the sender. Returns the
    /// delivery count.
    pub fn broadcast(&self, from: &str, data: Value) -> usize {
        let targets: Vec<String> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|id| id != from)
            .collect();
        let mut delivered = 0;
        for target in targets {
            let frame = ServerMessage::Broadcast {
                from: from.to_string(),
                room: None,
                data: data.clone(),
            };
            if self.send_to(&target, frame) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Broadcast to a room, excluding the sender. Returns `None` when the room
    /// does not exist.
    pub fn broadcast_room(&self, from: &str, room: &str, data: Value) -> Option<usize> {
        let members = self.rooms.get(room)?.clone();
        let mut delivered = 0;
        for member in members.iter().filter(|m| *m != from) {
            let frame = ServerMessage::Broadcast {
                from: from.to_string(),
                room: Some(room.to_string()),
                data: data.clone(),
            };
            if self.send_to(member, frame) {
                delivered += 1;
            }
        }
        Some(delivered)
    }

    /// Tear a connection down: leave every room (notifying remaining members,
    /// deleting rooms left empty), drop every subscription, and remove the
    /// connection so no further delivery is attempted.
    pub fn disconnect(&self, id: &str) {
        let Some((_, connection)) = self.connections.remove(id) else {
            return;
        };
        for room in &connection.rooms {
            if let Some(remaining) = self.remove_membership(id, room) {
                for member in &remaining {
                    self.send_to(
                        member,
                        ServerMessage::RoomMemberLeft {
                            room: room.to_string(),
                            member: id.to_string(),
                            members: remaining.clone(),
                        },
                    );
                }
            }
        }
        for channel in &connection.channels {
            self.remove_subscription(id, channel);
        }
        info!(
            connection_id = %id,
            remote_addr = %connection.remote_addr,
            connected_at = %connection.connected_at,
            "connection closed"
        );
    }

    /// Current member list of a room, in join order.
    pub fn room_members(&self, room: &str) -> Option<Vec<String>> {
        self.rooms.get(room).map(|members| members.clone())
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connections: self.connections.len(),
            rooms: self.rooms.len(),
            channels: self.channels.len(),
        }
    }

    /// Remove `id` from a room's member list, deleting the room when it
    /// becomes empty. Returns the remaining members, or `None` when the room
    /// was unknown or `id` was not a member.
    fn remove_membership(&self, id: &str, room: &str) -> Option<Vec<String>> {
        let (remaining, now_empty) = {
            let mut members = self.rooms.get_mut(room)?;
            let before = members.len();
            members.retain(|m| m != id);
            if members.len() == before {
                return None;
            }
            (members.clone(), members.is_empty())
        };
        if now_empty {
            self.rooms.remove(room);
            debug!(room = %room, "room deleted (empty)");
        }
        Some(remaining)
    }

    fn remove_subscription(&self, id: &str, channel: &str) {
        let now_empty = {
            match self.channels.get_mut(channel) {
                Some(mut subscribers) => {
                    subscribers.retain(|s| s != id);
                    subscribers.is_empty()
                }
                None => return,
            }
        };
        if now_empty {
            self.channels.remove(channel);
        }
    }
}
