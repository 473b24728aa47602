//! Process-wide room membership registry
//!
//! Rooms live in a `DashMap`, so membership mutation for one room is
//! serialized behind its entry lock (the capacity check and the add are one
//! atomic step) while different rooms proceed fully in parallel. A second
//! map from connection id to `{peer_id, room_id}` gives O(1) cleanup when a
//! socket dies without a prior `leave`.

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::constants::ROOM_CAPACITY;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::PeerId;

/// Outbound half of one client connection
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ClientHandle {
    pub fn new(tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a message; a closed connection is not an error here
    pub fn send(&self, message: ServerMessage) {
        if self.tx.send(message).is_err() {
            tracing::debug!("Dropping message to closed connection {}", self.id);
        }
    }
}

struct Member {
    peer_id: PeerId,
    handle: ClientHandle,
}

#[derive(Default)]
struct Room {
    members: Vec<Member>,
}

impl Room {
    fn peer_ids(&self) -> Vec<PeerId> {
        self.members.iter().map(|m| m.peer_id.clone()).collect()
    }

    fn broadcast(&self, message: &ServerMessage) {
        for member in &self.members {
            member.handle.send(message.clone());
        }
    }
}

struct PeerRef {
    peer_id: PeerId,
    room_id: String,
}

/// Room registry plus connection reverse lookup
pub struct RoomRegistry {
    capacity: usize,
    rooms: DashMap<String, Room>,
    connections: DashMap<Uuid, PeerRef>,
}

impl RoomRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rooms: DashMap::new(),
            connections: DashMap::new(),
        }
    }

    /// Parse and dispatch one inbound message. Structurally invalid
    /// payloads get an `error` reply and change nothing.
    pub fn handle_message(&self, handle: &ClientHandle, raw: &str) {
        let message: ClientMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Invalid message from {}: {}", handle.id(), e);
                handle.send(ServerMessage::Error {
                    message: "Invalid message format".into(),
                });
                return;
            }
        };

        match message {
            ClientMessage::Join { room_id, peer_id } => self.join(handle, &room_id, &peer_id),
            ClientMessage::Leave { room_id, peer_id } => self.leave(&room_id, &peer_id),
            ClientMessage::Ping => handle.send(ServerMessage::Pong),
            ClientMessage::Unknown => {
                tracing::warn!("Unknown message type from {}", handle.id());
                handle.send(ServerMessage::Error {
                    message: "Unknown message type".into(),
                });
            }
        }
    }

    /// Admit a peer into a room, creating the room lazily.
    ///
    /// Replies with the full member list, then broadcasts `peer_joined` to
    /// every member including the joiner, so clients handle "discover
    /// existing members" and "notice a new one" through one path.
    pub fn join(&self, handle: &ClientHandle, room_id: &str, peer_id: &str) {
        if room_id.is_empty() || peer_id.is_empty() {
            handle.send(ServerMessage::Error {
                message: "Missing roomId or peerId".into(),
            });
            return;
        }

        tracing::info!("Peer {} joining room {}", peer_id, room_id);
        let mut room = self.rooms.entry(room_id.to_string()).or_default();

        // Rejoin with the same id replaces the stale connection
        room.members.retain(|m| m.peer_id != peer_id);

        if room.members.len() >= self.capacity {
            tracing::info!("Room {} full, rejecting {}", room_id, peer_id);
            handle.send(ServerMessage::RoomFull {
                message: format!("Room is full ({} user capacity reached)", self.capacity),
            });
            return;
        }

        room.members.push(Member {
            peer_id: peer_id.to_string(),
            handle: handle.clone(),
        });
        self.connections.insert(
            handle.id(),
            PeerRef {
                peer_id: peer_id.to_string(),
                room_id: room_id.to_string(),
            },
        );

        let peers = room.peer_ids();
        tracing::info!("Room {} now has {} peer(s)", room_id, peers.len());

        handle.send(ServerMessage::PeerList {
            peers: peers.clone(),
            room_id: room_id.to_string(),
        });
        room.broadcast(&ServerMessage::PeerJoined {
            peer_id: peer_id.to_string(),
            peers,
        });
    }

    /// Remove a peer; delete the room entirely once empty, otherwise
    /// broadcast `peer_left` to the remaining members
    pub fn leave(&self, room_id: &str, peer_id: &str) {
        if room_id.is_empty() || peer_id.is_empty() {
            return;
        }

        let mut emptied = false;
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            let before = room.members.len();
            room.members.retain(|m| {
                if m.peer_id == peer_id {
                    self.connections.remove(&m.handle.id());
                    false
                } else {
                    true
                }
            });
            if room.members.len() == before {
                return;
            }
            tracing::info!("Peer {} left room {}", peer_id, room_id);

            if room.members.is_empty() {
                emptied = true;
            } else {
                let peers = room.peer_ids();
                room.broadcast(&ServerMessage::PeerLeft {
                    peer_id: peer_id.to_string(),
                    peers,
                });
            }
        }

        if emptied {
            self.rooms.remove(room_id);
            tracing::info!("Room {} deleted (empty)", room_id);
        }
    }

    /// Socket close/error without a prior `leave`: implicit leave via the
    /// reverse lookup. Unregistered connections are logged and ignored.
    pub fn disconnect(&self, connection_id: Uuid) {
        match self.connections.remove(&connection_id) {
            Some((_, peer_ref)) => {
                tracing::info!(
                    "Peer {} disconnected from room {}",
                    peer_ref.peer_id,
                    peer_ref.room_id
                );
                self.leave(&peer_ref.room_id, &peer_ref.peer_id);
            }
            None => tracing::debug!("Unknown connection {} disconnected", connection_id),
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn member_count(&self, room_id: &str) -> Option<usize> {
        self.rooms.get(room_id).map(|room| room.members.len())
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(ROOM_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> (ClientHandle, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientHandle::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn test_first_join_sees_only_itself() {
        let registry = RoomRegistry::default();
        let (a, mut a_rx) = client();

        registry.join(&a, "lounge", "peer-a");

        let messages = drain(&mut a_rx);
        assert_eq!(
            messages[0],
            ServerMessage::PeerList {
                peers: vec!["peer-a".into()],
                room_id: "lounge".into(),
            }
        );
    }

    #[test]
    fn test_second_join_broadcasts_to_existing_member() {
        let registry = RoomRegistry::default();
        let (a, mut a_rx) = client();
        let (b, mut b_rx) = client();

        registry.join(&a, "lounge", "peer-a");
        drain(&mut a_rx);
        registry.join(&b, "lounge", "peer-b");

        // A hears about B through peer_joined
        let to_a = drain(&mut a_rx);
        assert_eq!(
            to_a,
            vec![ServerMessage::PeerJoined {
                peer_id: "peer-b".into(),
                peers: vec!["peer-a".into(), "peer-b".into()],
            }]
        );

        // B gets the full list first, then the same broadcast
        let to_b = drain(&mut b_rx);
        assert_eq!(
            to_b[0],
            ServerMessage::PeerList {
                peers: vec!["peer-a".into(), "peer-b".into()],
                room_id: "lounge".into(),
            }
        );
        assert!(matches!(to_b[1], ServerMessage::PeerJoined { .. }));
    }

    #[test]
    fn test_capacity_boundary() {
        let registry = RoomRegistry::default();
        let mut handles = Vec::new();
        for i in 0..9 {
            let (h, rx) = client();
            registry.join(&h, "lounge", &format!("peer-{i}"));
            handles.push((h, rx));
        }
        assert_eq!(registry.member_count("lounge"), Some(9));

        // Tenth join succeeds and fills the room
        let (tenth, mut tenth_rx) = client();
        registry.join(&tenth, "lounge", "peer-9");
        assert_eq!(registry.member_count("lounge"), Some(10));
        assert!(matches!(
            drain(&mut tenth_rx)[0],
            ServerMessage::PeerList { .. }
        ));

        // Eleventh is rejected, not queued
        let (eleventh, mut eleventh_rx) = client();
        registry.join(&eleventh, "lounge", "peer-10");
        assert_eq!(registry.member_count("lounge"), Some(10));
        assert!(matches!(
            drain(&mut eleventh_rx)[0],
            ServerMessage::RoomFull { .. }
        ));
    }

    #[test]
    fn test_empty_room_is_removed_not_just_emptied() {
        let registry = RoomRegistry::default();
        let (a, _a_rx) = client();
        registry.join(&a, "lounge", "peer-a");
        assert_eq!(registry.room_count(), 1);

        registry.leave("lounge", "peer-a");
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.member_count("lounge"), None);
    }

    #[test]
    fn test_leave_broadcasts_to_remaining() {
        let registry = RoomRegistry::default();
        let (a, mut a_rx) = client();
        let (b, _b_rx) = client();
        registry.join(&a, "lounge", "peer-a");
        registry.join(&b, "lounge", "peer-b");
        drain(&mut a_rx);

        registry.leave("lounge", "peer-b");
        assert_eq!(
            drain(&mut a_rx),
            vec![ServerMessage::PeerLeft {
                peer_id: "peer-b".into(),
                peers: vec!["peer-a".into()],
            }]
        );
    }

    #[test]
    fn test_abrupt_disconnect_is_implicit_leave() {
        let registry = RoomRegistry::default();
        let (a, _a_rx) = client();
        let (b, _b_rx) = client();
        registry.join(&a, "lounge", "peer-a");
        registry.join(&b, "lounge", "peer-b");

        registry.disconnect(b.id());
        assert_eq!(registry.member_count("lounge"), Some(1));

        // Unknown connections are ignored
        registry.disconnect(Uuid::new_v4());
        assert_eq!(registry.member_count("lounge"), Some(1));
    }

    #[test]
    fn test_join_missing_fields_is_rejected() {
        let registry = RoomRegistry::default();
        let (a, mut a_rx) = client();
        registry.join(&a, "", "peer-a");
        assert!(matches!(drain(&mut a_rx)[0], ServerMessage::Error { .. }));
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_malformed_message_replies_error_without_state_change() {
        let registry = RoomRegistry::default();
        let (a, mut a_rx) = client();
        registry.handle_message(&a, "{nonsense");
        assert!(matches!(drain(&mut a_rx)[0], ServerMessage::Error { .. }));
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_unknown_kind_replies_error() {
        let registry = RoomRegistry::default();
        let (a, mut a_rx) = client();
        registry.handle_message(&a, r#"{"type":"dance"}"#);
        assert!(matches!(drain(&mut a_rx)[0], ServerMessage::Error { .. }));
    }

    #[test]
    fn test_ping_pong_has_no_side_effects() {
        let registry = RoomRegistry::default();
        let (a, mut a_rx) = client();
        registry.handle_message(&a, r#"{"type":"ping"}"#);
        assert_eq!(drain(&mut a_rx), vec![ServerMessage::Pong]);
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_rooms_are_independent() {
        let registry = RoomRegistry::default();
        for i in 0..10 {
            let (h, _rx) = client();
            registry.join(&h, "lounge", &format!("peer-{i}"));
        }
        // A full lounge does not affect the stage room
        let (h, mut rx) = client();
        registry.join(&h, "stage", "peer-x");
        assert!(matches!(drain(&mut rx)[0], ServerMessage::PeerList { .. }));
        assert_eq!(registry.member_count("stage"), Some(1));
    }
}
