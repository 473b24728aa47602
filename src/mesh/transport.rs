//! Transport seam for direct peer connections
//!
//! NAT traversal, ICE, and the actual media path live outside this crate.
//! The mesh only needs connect/send/close primitives over opaque peer ids
//! plus an event stream for the incoming side. [`ChannelTransport`] is the
//! in-process implementation used by tests and the demo binary: a shared hub
//! routes events between transports over unbounded channels.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio::StreamHandle;
use crate::error::MeshError;
use crate::protocol::PeerMessage;
use crate::PeerId;

/// Raw per-connection events a transport surfaces to the coordinator
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A remote peer opened a direct connection to us; `stream` is its
    /// audio stream handle
    IncomingConnection { peer_id: PeerId, stream: StreamHandle },

    /// A direct connection closed, whatever the cause
    ConnectionClosed { peer_id: PeerId },

    /// A data-channel message arrived
    Message { peer_id: PeerId, message: PeerMessage },
}

/// Connect/accept/send/close over opaque peer ids
pub trait Transport: Send + Sync + 'static {
    /// The locally assigned transport identity
    fn local_id(&self) -> PeerId;

    /// Open a direct connection to `peer_id`; resolves with the remote
    /// audio stream handle once established
    fn connect(
        &self,
        peer_id: &str,
    ) -> impl Future<Output = Result<StreamHandle, MeshError>> + Send;

    /// Send one data-channel message, at-most-once
    fn send(&self, peer_id: &str, message: &PeerMessage) -> Result<(), MeshError>;

    /// Close the direct connection to `peer_id`
    fn close(&self, peer_id: &str);

    /// Take the event stream. Yields `None` after the first take.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;
}

/// In-process rendezvous point connecting [`ChannelTransport`] instances
pub struct ChannelHub {
    peers: DashMap<PeerId, mpsc::UnboundedSender<TransportEvent>>,
}

impl ChannelHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peers: DashMap::new(),
        })
    }

    /// Create a transport with a fresh generated identity
    pub fn transport(self: &Arc<Self>) -> ChannelTransport {
        self.transport_with_id(format!("peer-{}", Uuid::new_v4()))
    }

    /// Create a transport with a caller-chosen identity (tests)
    pub fn transport_with_id(self: &Arc<Self>, local_id: impl Into<PeerId>) -> ChannelTransport {
        let local_id = local_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.insert(local_id.clone(), tx);
        ChannelTransport {
            hub: Arc::clone(self),
            local_id,
            events: Mutex::new(Some(rx)),
        }
    }

    fn deliver(&self, peer_id: &str, event: TransportEvent) -> Result<(), MeshError> {
        let entry = self
            .peers
            .get(peer_id)
            .ok_or_else(|| MeshError::PeerNotConnected(peer_id.to_string()))?;
        entry.value().send(event).map_err(|_| MeshError::ConnectFailed {
            peer_id: peer_id.to_string(),
            reason: "peer event channel closed".into(),
        })
    }

    /// Drop a transport's registration (session teardown)
    pub fn unregister(&self, peer_id: &str) {
        self.peers.remove(peer_id);
    }
}

/// Loopback transport backed by a [`ChannelHub`]
pub struct ChannelTransport {
    hub: Arc<ChannelHub>,
    local_id: PeerId,
    events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl ChannelTransport {
    /// The audio stream handle remote peers receive from us
    fn local_stream(&self) -> StreamHandle {
        StreamHandle::new(format!("{}/audio", self.local_id))
    }
}

impl Transport for ChannelTransport {
    fn local_id(&self) -> PeerId {
        self.local_id.clone()
    }

    async fn connect(&self, peer_id: &str) -> Result<StreamHandle, MeshError> {
        self.hub.deliver(
            peer_id,
            TransportEvent::IncomingConnection {
                peer_id: self.local_id.clone(),
                stream: self.local_stream(),
            },
        )?;
        Ok(StreamHandle::new(format!("{peer_id}/audio")))
    }

    fn send(&self, peer_id: &str, message: &PeerMessage) -> Result<(), MeshError> {
        self.hub.deliver(
            peer_id,
            TransportEvent::Message {
                peer_id: self.local_id.clone(),
                message: message.clone(),
            },
        )
    }

    fn close(&self, peer_id: &str) {
        // Best effort: the remote may already be gone
        let _ = self.hub.deliver(
            peer_id,
            TransportEvent::ConnectionClosed {
                peer_id: self.local_id.clone(),
            },
        );
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.lock().take()
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        self.hub.unregister(&self.local_id);
    }
}
