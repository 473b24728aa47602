//! Wire protocol for rendezvous signaling and direct peer data channels
//!
//! All messages are JSON objects tagged by a `type` field. Field names are
//! camelCase on the wire. Unknown kinds decode to an explicit `Unknown`
//! variant so receivers can log and drop them instead of failing the
//! connection.

use serde::{Deserialize, Serialize};

use crate::zones::Position;
use crate::PeerId;

/// Messages a client sends to the rendezvous server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room
    #[serde(rename_all = "camelCase")]
    Join { room_id: String, peer_id: PeerId },

    /// Leave a room
    #[serde(rename_all = "camelCase")]
    Leave { room_id: String, peer_id: PeerId },

    /// Liveness probe
    Ping,

    /// Any message kind this build does not recognize
    #[serde(other)]
    Unknown,
}

/// Messages the rendezvous server sends to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection acknowledgement
    Welcome { message: String },

    /// Current member list, sent to a peer right after it joins
    #[serde(rename_all = "camelCase")]
    PeerList { peers: Vec<PeerId>, room_id: String },

    /// A peer joined the room (broadcast to every member, joiner included)
    #[serde(rename_all = "camelCase")]
    PeerJoined { peer_id: PeerId, peers: Vec<PeerId> },

    /// A peer left the room (broadcast to the remaining members)
    #[serde(rename_all = "camelCase")]
    PeerLeft { peer_id: PeerId, peers: Vec<PeerId> },

    /// Join rejected: the room is at capacity
    RoomFull { message: String },

    /// Reply to `ping`
    Pong,

    /// Protocol-level error reply; registry state is unchanged
    Error { message: String },
}

/// Messages exchanged over direct peer data channels
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Membership snapshot. Merge-only on receipt: a snapshot adds unknown
    /// ids but never removes; removal comes from explicit leave/close.
    PeerList { peers: Vec<PeerId> },

    /// Latest spatial position of the sender
    PositionUpdate { position: Position },

    /// Chat text with a sender-side millisecond timestamp
    ChatMessage { text: String, timestamp: i64 },

    /// The sender's room is at capacity; the connection will be closed
    RoomFull { message: String },

    /// Unrecognized kind; logged and dropped by the dispatcher
    #[serde(other)]
    Unknown,
}
