//! Synchronous event dispatch
//!
//! Components expose their semantic events through an [`EventEmitter`]:
//! a subscriber list invoked synchronously, in registration order, on every
//! emit. Handlers must not block; long-running reactions belong in tasks the
//! handler spawns.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::zones::Position;
use crate::PeerId;

/// Room-semantic events produced by the mesh coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// The local session joined a room and was assigned an identity
    RoomJoined { room_id: String, peer_id: PeerId },

    /// The local session left its room
    RoomLeft { room_id: String },

    /// A peer was admitted into the mesh
    PeerJoined { peer_id: PeerId, room_size: usize },

    /// A peer was removed from the mesh (explicit leave or connection close)
    PeerLeft { peer_id: PeerId, room_size: usize },

    /// The tracked member set changed after merging a membership snapshot
    PeerListUpdate { peers: Vec<PeerId> },

    /// A peer broadcast a new spatial position
    PeerPositionUpdate { peer_id: PeerId, position: Position },

    /// A peer sent a chat message
    ChatMessage {
        peer_id: PeerId,
        text: String,
        timestamp: i64,
    },

    /// A remote room rejected us for being at capacity
    RoomFull { message: String },

    /// Automatic reconnection to a peer gave up; the owner must decide
    /// whether to drop the peer or request a manual reconnect
    ReconnectExhausted { peer_id: PeerId },

    /// Local microphone was muted
    MicrophoneMuted,

    /// Local microphone was unmuted
    MicrophoneUnmuted,
}

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Subscriber list with synchronous, registration-order dispatch
pub struct EventEmitter<E> {
    handlers: RwLock<Vec<Handler<E>>>,
}

impl<E> EventEmitter<E> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register a handler; it will be invoked for every subsequent emit
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.handlers.write().push(Arc::new(handler));
    }

    /// Invoke all current subscribers in registration order
    pub fn emit(&self, event: &E) {
        // Snapshot outside the lock so a handler may subscribe re-entrantly.
        let handlers: Vec<Handler<E>> = self.handlers.read().clone();
        for handler in handlers {
            handler(event);
        }
    }

    /// Number of registered handlers
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Drop all subscribers
    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}
