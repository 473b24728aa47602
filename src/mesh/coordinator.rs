//! Peer mesh coordinator
//!
//! Maintains a capacity-bounded full mesh for one room: admission gating,
//! membership bookkeeping, message dispatch, and translation of raw
//! transport events into room-semantic events. Membership mutation is
//! serialized behind one lock so a capacity check is never followed by a
//! stale add.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::audio::{CaptureSource, SpatialAudioEngine};
use crate::constants::{DEFAULT_CONNECT_TIMEOUT_MS, ROOM_CAPACITY};
use crate::error::{Error, MeshError};
use crate::events::{EventEmitter, MeshEvent};
use crate::mesh::state_machine::{
    ConnectionState, ConnectionStateMachine, MachineEvent, ReconnectPolicy,
};
use crate::mesh::transport::{Transport, TransportEvent};
use crate::protocol::PeerMessage;
use crate::rendezvous::client::{RendezvousClient, RendezvousEvent};
use crate::zones::Position;
use crate::PeerId;

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Hard member cap, local and remote admission alike
    pub capacity: usize,
    /// Bound on discovery and per-peer connection attempts
    pub connect_timeout: Duration,
    /// Rendezvous server to discover peers through; `None` means manual
    /// connection only
    pub rendezvous_url: Option<String>,
    /// Backoff parameters handed to each per-peer state machine
    pub reconnect: ReconnectPolicy,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            capacity: ROOM_CAPACITY,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            rendezvous_url: None,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

struct CoordState {
    room_id: Option<String>,
    /// Mesh members including self. A peer can be here before its direct
    /// link completes: membership can be learned from a snapshot first.
    peers: HashSet<PeerId>,
    machines: HashMap<PeerId, Arc<ConnectionStateMachine>>,
}

/// Full-mesh coordinator for one local session
pub struct MeshCoordinator<T: Transport> {
    transport: Arc<T>,
    config: MeshConfig,
    state: Mutex<CoordState>,
    events: EventEmitter<MeshEvent>,
    audio: Mutex<Option<Arc<SpatialAudioEngine>>>,
    microphone: Mutex<Option<Arc<dyn CaptureSource>>>,
    rendezvous: Mutex<Option<RendezvousClient>>,
}

impl<T: Transport> MeshCoordinator<T> {
    /// Build the coordinator and start pumping transport events.
    /// Must be called within a tokio runtime.
    pub fn new(transport: T, config: MeshConfig) -> Arc<Self> {
        let transport = Arc::new(transport);
        let events_rx = transport.take_events();

        let coordinator = Arc::new(Self {
            transport,
            config,
            state: Mutex::new(CoordState {
                room_id: None,
                peers: HashSet::new(),
                machines: HashMap::new(),
            }),
            events: EventEmitter::new(),
            audio: Mutex::new(None),
            microphone: Mutex::new(None),
            rendezvous: Mutex::new(None),
        });

        if let Some(mut rx) = events_rx {
            let weak = Arc::downgrade(&coordinator);
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    let Some(coordinator) = weak.upgrade() else {
                        break;
                    };
                    coordinator.handle_transport_event(event);
                }
            });
        } else {
            tracing::warn!("Transport events already taken; coordinator will not see peers");
        }

        coordinator
    }

    /// Wire up the spatial audio engine that owns remote source gains
    pub fn attach_audio(&self, engine: Arc<SpatialAudioEngine>) {
        *self.audio.lock() = Some(engine);
    }

    /// Wire up the local capture source for mute toggling
    pub fn attach_microphone(&self, microphone: Arc<dyn CaptureSource>) {
        *self.microphone.lock() = Some(microphone);
    }

    /// Room-semantic event stream
    pub fn events(&self) -> &EventEmitter<MeshEvent> {
        &self.events
    }

    /// Join a room: acquire an identity, register self, and attempt peer
    /// discovery through the rendezvous service.
    ///
    /// Discovery failure does not fail the join; it only disables automatic
    /// peer-finding, leaving [`connect_to_peer`](Self::connect_to_peer) as
    /// the fallback.
    pub async fn join_room(self: &Arc<Self>, room_id: &str) -> Result<PeerId, Error> {
        let local_id = self.transport.local_id();
        {
            let mut state = self.state.lock();
            if state.room_id.is_some() {
                return Err(MeshError::AlreadyJoined.into());
            }
            state.room_id = Some(room_id.to_string());
            state.peers.insert(local_id.clone());
        }

        tracing::info!("Joining room {} as {}", room_id, local_id);

        if let Some(url) = self.config.rendezvous_url.clone() {
            match tokio::time::timeout(self.config.connect_timeout, RendezvousClient::connect(&url))
                .await
            {
                Ok(Ok((client, events))) => {
                    if let Err(e) = client.join(room_id, &local_id) {
                        tracing::warn!("Rendezvous join failed: {}; manual connection only", e);
                    } else {
                        self.spawn_discovery(events, local_id.clone());
                        *self.rendezvous.lock() = Some(client);
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!("Peer discovery unavailable: {}; manual connection only", e);
                }
                Err(_) => {
                    tracing::warn!("Peer discovery timed out; manual connection only");
                }
            }
        } else {
            tracing::info!("No rendezvous configured; manual connection only");
        }

        self.events.emit(&MeshEvent::RoomJoined {
            room_id: room_id.to_string(),
            peer_id: local_id.clone(),
        });
        Ok(local_id)
    }

    fn spawn_discovery(
        self: &Arc<Self>,
        mut events: tokio::sync::mpsc::UnboundedReceiver<RendezvousEvent>,
        local_id: PeerId,
    ) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(coordinator) = weak.upgrade() else {
                    break;
                };
                match event {
                    // The joiner dials every existing member; members that
                    // see peer_joined just wait for the incoming side.
                    RendezvousEvent::PeerList { peers, .. } => {
                        for peer_id in peers {
                            if peer_id != local_id {
                                coordinator.spawn_connect(peer_id);
                            }
                        }
                    }
                    RendezvousEvent::RoomFull { message } => {
                        coordinator.events.emit(&MeshEvent::RoomFull { message });
                    }
                    RendezvousEvent::Error { message } => {
                        tracing::warn!("Rendezvous error: {}", message);
                    }
                    _ => {}
                }
            }
        });
    }

    fn spawn_connect(self: &Arc<Self>, peer_id: PeerId) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            if let Some(coordinator) = weak.upgrade() {
                if let Err(e) = coordinator.connect_to_peer(&peer_id).await {
                    tracing::warn!("Failed to connect to {}: {}", peer_id, e);
                }
            }
        });
    }

    /// Open a direct connection to a peer and admit it into the mesh.
    ///
    /// No-op (with a warning) if already tracked; fails with a capacity
    /// error if the room is full.
    pub async fn connect_to_peer(self: &Arc<Self>, remote_peer_id: &str) -> Result<(), Error> {
        let machine = {
            let mut state = self.state.lock();
            if state.peers.contains(remote_peer_id) {
                tracing::warn!("Already tracking peer: {}", remote_peer_id);
                return Ok(());
            }
            if state.peers.len() >= self.config.capacity {
                return Err(MeshError::RoomFull(self.config.capacity).into());
            }
            self.machine_for(&mut state, remote_peer_id)
        };

        if machine.state() == ConnectionState::Disconnected {
            machine.transition(ConnectionState::Connecting);
        }

        let connect = self.transport.connect(remote_peer_id);
        let stream = match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                machine.transition_with_error(ConnectionState::Failed, Some(e.to_string()));
                return Err(Error::Mesh(e));
            }
            Err(_) => {
                machine.transition_with_error(
                    ConnectionState::Failed,
                    Some("connect timed out".into()),
                );
                return Err(MeshError::Timeout.into());
            }
        };

        // Re-check under the lock: a concurrent admission may have filled
        // the room while the connect was in flight.
        let snapshot = {
            let mut state = self.state.lock();
            if state.peers.contains(remote_peer_id) {
                tracing::warn!("Peer {} admitted concurrently", remote_peer_id);
                machine.transition(ConnectionState::Connected);
                return Ok(());
            }
            if state.peers.len() >= self.config.capacity {
                drop(state);
                self.transport.close(remote_peer_id);
                machine.transition(ConnectionState::Disconnected);
                return Err(MeshError::RoomFull(self.config.capacity).into());
            }
            let snapshot: Vec<PeerId> = state.peers.iter().cloned().collect();
            state.peers.insert(remote_peer_id.to_string());
            snapshot
        };

        machine.transition(ConnectionState::Connected);

        // Current membership goes to the new peer before anything else
        if let Err(e) = self
            .transport
            .send(remote_peer_id, &PeerMessage::PeerList { peers: snapshot })
        {
            tracing::warn!("Failed to send snapshot to {}: {}", remote_peer_id, e);
        }

        self.add_audio_source(remote_peer_id, stream);
        let room_size = self.member_count();
        tracing::info!(
            "Connected to peer {} ({}/{})",
            remote_peer_id,
            room_size,
            self.config.capacity
        );
        self.events.emit(&MeshEvent::PeerJoined {
            peer_id: remote_peer_id.to_string(),
            room_size,
        });
        Ok(())
    }

    fn handle_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::IncomingConnection { peer_id, stream } => {
                self.handle_incoming(peer_id, stream)
            }
            TransportEvent::ConnectionClosed { peer_id } => self.handle_peer_loss(&peer_id),
            TransportEvent::Message { peer_id, message } => self.dispatch(&peer_id, message),
        }
    }

    fn handle_incoming(self: &Arc<Self>, peer_id: PeerId, stream: crate::audio::StreamHandle) {
        let admitted = {
            let mut state = self.state.lock();
            if state.peers.contains(&peer_id) {
                tracing::warn!("Incoming connection from already-tracked peer {}", peer_id);
                return;
            }
            // Admission is the gate: a full room rejects before membership
            if state.peers.len() >= self.config.capacity {
                false
            } else {
                state.peers.insert(peer_id.clone());
                let machine = self.machine_for(&mut state, &peer_id);
                machine.transition(ConnectionState::Connecting);
                machine.transition(ConnectionState::Connected);
                true
            }
        };

        if !admitted {
            tracing::warn!("Room is full, rejecting incoming peer {}", peer_id);
            let _ = self.transport.send(
                &peer_id,
                &PeerMessage::RoomFull {
                    message: format!("Room is full ({} user capacity reached)", self.config.capacity),
                },
            );
            self.transport.close(&peer_id);
            return;
        }

        // New member gets the membership snapshot, everyone gets the update
        let members = self.members();
        if let Err(e) = self.transport.send(
            &peer_id,
            &PeerMessage::PeerList {
                peers: members.clone(),
            },
        ) {
            tracing::warn!("Failed to send snapshot to {}: {}", peer_id, e);
        }
        self.broadcast_peer_list();
        self.add_audio_source(&peer_id, stream);

        let room_size = members.len();
        tracing::info!("Accepted peer {} ({}/{})", peer_id, room_size, self.config.capacity);
        self.events.emit(&MeshEvent::PeerJoined { peer_id, room_size });
    }

    /// Confirmed peer loss: remove membership, tear down audio, notify the
    /// remaining mesh. Connection close is the authoritative removal signal.
    fn handle_peer_loss(self: &Arc<Self>, peer_id: &str) {
        let was_tracked = {
            let mut state = self.state.lock();
            let was_tracked = state.peers.remove(peer_id);
            if let Some(machine) = state.machines.remove(peer_id) {
                // Destruction ends in the terminal closed state
                if machine.state() == ConnectionState::Connected {
                    machine.transition(ConnectionState::Closed);
                } else {
                    tracing::debug!(
                        "Discarding machine for {} in state {}",
                        peer_id,
                        machine.state()
                    );
                }
            }
            was_tracked
        };

        if !was_tracked {
            tracing::debug!("Close from untracked peer {}", peer_id);
            return;
        }

        if let Some(engine) = self.audio.lock().as_ref() {
            engine.remove_source(peer_id);
        }
        self.broadcast_peer_list();

        let room_size = self.member_count();
        tracing::info!("Peer left: {} ({}/{})", peer_id, room_size, self.config.capacity);
        self.events.emit(&MeshEvent::PeerLeft {
            peer_id: peer_id.to_string(),
            room_size,
        });
    }

    fn dispatch(self: &Arc<Self>, peer_id: &str, message: PeerMessage) {
        match message {
            PeerMessage::PeerList { peers } => {
                // Merge-only: a snapshot never removes ids. Removal comes
                // from explicit leave/close, not a possibly stale list.
                // Only admitted members may grow membership, and never past
                // the capacity cap: a peer the incoming gate just rejected
                // must not sneak in through its own snapshot.
                let merged = {
                    let mut state = self.state.lock();
                    if !state.peers.contains(peer_id) {
                        tracing::warn!("Dropping membership snapshot from unadmitted peer {}", peer_id);
                        None
                    } else {
                        let mut changed = false;
                        for peer in peers {
                            if !state.peers.contains(&peer)
                                && state.peers.len() >= self.config.capacity
                            {
                                tracing::warn!(
                                    "Snapshot from {} would exceed capacity; ignoring {}",
                                    peer_id,
                                    peer
                                );
                                continue;
                            }
                            changed |= state.peers.insert(peer);
                        }
                        changed.then(|| state.peers.iter().cloned().collect::<Vec<_>>())
                    }
                };
                if let Some(peers) = merged {
                    self.events.emit(&MeshEvent::PeerListUpdate { peers });
                }
            }
            PeerMessage::PositionUpdate { position } => {
                if let Some(engine) = self.audio.lock().as_ref() {
                    if let Err(e) = engine.update_source_position(peer_id, position.clone()) {
                        tracing::warn!("Audio retarget for {} failed: {}", peer_id, e);
                    }
                }
                self.events.emit(&MeshEvent::PeerPositionUpdate {
                    peer_id: peer_id.to_string(),
                    position,
                });
            }
            PeerMessage::ChatMessage { text, timestamp } => {
                self.events.emit(&MeshEvent::ChatMessage {
                    peer_id: peer_id.to_string(),
                    text,
                    timestamp,
                });
            }
            PeerMessage::RoomFull { message } => {
                self.events.emit(&MeshEvent::RoomFull { message });
            }
            PeerMessage::Unknown => {
                tracing::warn!("Unknown message kind from {}, dropping", peer_id);
            }
        }
    }

    /// Broadcast our spatial position to every direct connection
    pub fn broadcast_position(&self, position: &Position) {
        self.broadcast(&PeerMessage::PositionUpdate {
            position: position.clone(),
        });
    }

    /// Send a chat message to every direct connection
    pub fn send_chat(&self, text: &str) {
        self.broadcast(&PeerMessage::ChatMessage {
            text: text.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
    }

    fn broadcast_peer_list(&self) {
        self.broadcast(&PeerMessage::PeerList {
            peers: self.members(),
        });
    }

    fn broadcast(&self, message: &PeerMessage) {
        let local_id = self.transport.local_id();
        for peer_id in self.members() {
            if peer_id == local_id {
                continue;
            }
            // At-most-once: no retry, position and chat are live streams
            if let Err(e) = self.transport.send(&peer_id, message) {
                tracing::debug!("Broadcast to {} failed: {}", peer_id, e);
            }
        }
    }

    /// Toggle the local microphone; returns the new muted state, or `None`
    /// if no capture source is attached
    pub fn toggle_microphone(&self) -> Option<bool> {
        let microphone = self.microphone.lock();
        let Some(microphone) = microphone.as_ref() else {
            tracing::warn!("No capture source attached");
            return None;
        };
        let muted = !microphone.is_muted();
        microphone.set_muted(muted);
        self.events.emit(if muted {
            &MeshEvent::MicrophoneMuted
        } else {
            &MeshEvent::MicrophoneUnmuted
        });
        Some(muted)
    }

    /// Ask a peer's state machine for a manual reconnect
    pub fn request_reconnect(&self, peer_id: &str) -> bool {
        let machine = self.state.lock().machines.get(peer_id).cloned();
        match machine {
            Some(machine) => machine.request_reconnect(),
            None => {
                tracing::warn!("No connection state for peer {}", peer_id);
                false
            }
        }
    }

    /// Leave the room: close every connection, tear down audio and state
    pub async fn leave_room(self: &Arc<Self>) -> Result<(), Error> {
        let (room_id, peers, machines) = {
            let mut state = self.state.lock();
            let room_id = state.room_id.take().ok_or(MeshError::NotJoined)?;
            let peers: Vec<PeerId> = state.peers.drain().collect();
            let machines: Vec<_> = state.machines.drain().map(|(_, m)| m).collect();
            (room_id, peers, machines)
        };

        let local_id = self.transport.local_id();
        for peer_id in &peers {
            if *peer_id != local_id {
                self.transport.close(peer_id);
            }
        }
        for machine in machines {
            if machine.state() == ConnectionState::Connected {
                machine.transition(ConnectionState::Closed);
            }
        }
        if let Some(engine) = self.audio.lock().as_ref() {
            for peer_id in &peers {
                engine.remove_source(peer_id);
            }
        }
        if let Some(client) = self.rendezvous.lock().take() {
            client.leave().ok();
        }

        tracing::info!("Left room {}", room_id);
        self.events.emit(&MeshEvent::RoomLeft { room_id });
        Ok(())
    }

    pub fn local_id(&self) -> PeerId {
        self.transport.local_id()
    }

    pub fn room_id(&self) -> Option<String> {
        self.state.lock().room_id.clone()
    }

    pub fn member_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    pub fn members(&self) -> Vec<PeerId> {
        self.state.lock().peers.iter().cloned().collect()
    }

    pub fn is_room_full(&self) -> bool {
        self.member_count() >= self.config.capacity
    }

    pub fn connection_state(&self, peer_id: &str) -> Option<ConnectionState> {
        self.state.lock().machines.get(peer_id).map(|m| m.state())
    }

    fn add_audio_source(&self, peer_id: &str, stream: crate::audio::StreamHandle) {
        if let Some(engine) = self.audio.lock().as_ref() {
            if let Err(e) = engine.add_source(peer_id, &stream, Position::default()) {
                tracing::warn!("Could not add audio source for {}: {}", peer_id, e);
            }
        }
    }

    /// Get or create the state machine for a peer, wiring redial and
    /// exhaustion handling
    fn machine_for(
        self: &Arc<Self>,
        state: &mut CoordState,
        peer_id: &str,
    ) -> Arc<ConnectionStateMachine> {
        if let Some(machine) = state.machines.get(peer_id) {
            return Arc::clone(machine);
        }
        let machine = ConnectionStateMachine::new(peer_id, self.config.reconnect.clone());
        let weak: Weak<Self> = Arc::downgrade(self);
        machine.events().subscribe(move |event: &MachineEvent| {
            let Some(coordinator) = weak.upgrade() else {
                return;
            };
            match event {
                MachineEvent::ReconnectAttempt { peer_id, .. } => {
                    coordinator.spawn_redial(peer_id.clone());
                }
                MachineEvent::ReconnectExhausted { peer_id } => {
                    coordinator.events.emit(&MeshEvent::ReconnectExhausted {
                        peer_id: peer_id.clone(),
                    });
                }
                _ => {}
            }
        });
        state
            .machines
            .insert(peer_id.to_string(), Arc::clone(&machine));
        machine
    }

    /// Redial after a reconnect timer fired
    fn spawn_redial(self: &Arc<Self>, peer_id: PeerId) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let Some(coordinator) = weak.upgrade() else {
                return;
            };
            let machine = coordinator.state.lock().machines.get(&peer_id).cloned();
            let Some(machine) = machine else { return };

            let connect = coordinator.transport.connect(&peer_id);
            match tokio::time::timeout(coordinator.config.connect_timeout, connect).await {
                Ok(Ok(stream)) => {
                    // Same admission re-check as the dial path: membership
                    // may have changed while the retry timer was pending.
                    let snapshot = {
                        let mut state = coordinator.state.lock();
                        if state.peers.contains(&peer_id) {
                            machine.transition(ConnectionState::Connected);
                            return;
                        }
                        if state.peers.len() >= coordinator.config.capacity {
                            drop(state);
                            tracing::warn!(
                                "Room filled while reconnecting to {}; dropping link",
                                peer_id
                            );
                            coordinator.transport.close(&peer_id);
                            machine.transition(ConnectionState::Disconnected);
                            return;
                        }
                        let snapshot: Vec<PeerId> = state.peers.iter().cloned().collect();
                        state.peers.insert(peer_id.clone());
                        snapshot
                    };

                    machine.transition(ConnectionState::Connected);
                    if let Err(e) = coordinator
                        .transport
                        .send(&peer_id, &PeerMessage::PeerList { peers: snapshot })
                    {
                        tracing::warn!("Failed to send snapshot to {}: {}", peer_id, e);
                    }
                    coordinator.add_audio_source(&peer_id, stream);
                    let room_size = coordinator.member_count();
                    coordinator
                        .events
                        .emit(&MeshEvent::PeerJoined { peer_id, room_size });
                }
                Ok(Err(e)) => {
                    machine.transition_with_error(ConnectionState::Failed, Some(e.to_string()));
                }
                Err(_) => {
                    machine.transition_with_error(
                        ConnectionState::Failed,
                        Some("reconnect timed out".into()),
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SoftwareBackend;
    use crate::mesh::transport::ChannelHub;
    use crate::zones::ZoneRegistry;

    fn coordinator(
        hub: &Arc<ChannelHub>,
        id: &str,
    ) -> Arc<MeshCoordinator<crate::mesh::transport::ChannelTransport>> {
        MeshCoordinator::new(hub.transport_with_id(id), MeshConfig::default())
    }

    async fn settle() {
        // Let spawned event pumps drain
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_join_twice_fails() {
        let hub = ChannelHub::new();
        let alice = coordinator(&hub, "alice");
        alice.join_room("lounge").await.unwrap();
        let err = alice.join_room("lounge").await.unwrap_err();
        assert!(matches!(err, Error::Mesh(MeshError::AlreadyJoined)));
    }

    #[tokio::test]
    async fn test_connect_builds_mutual_membership() {
        let hub = ChannelHub::new();
        let alice = coordinator(&hub, "alice");
        let bob = coordinator(&hub, "bob");
        alice.join_room("lounge").await.unwrap();
        bob.join_room("lounge").await.unwrap();

        alice.connect_to_peer("bob").await.unwrap();
        settle().await;

        assert_eq!(alice.member_count(), 2);
        assert_eq!(bob.member_count(), 2);
        assert!(bob.members().contains(&"alice".to_string()));
        assert_eq!(
            alice.connection_state("bob"),
            Some(ConnectionState::Connected)
        );
    }

    #[tokio::test]
    async fn test_connect_to_tracked_peer_is_noop() {
        let hub = ChannelHub::new();
        let alice = coordinator(&hub, "alice");
        let bob = coordinator(&hub, "bob");
        alice.join_room("lounge").await.unwrap();
        bob.join_room("lounge").await.unwrap();

        alice.connect_to_peer("bob").await.unwrap();
        settle().await;
        alice.connect_to_peer("bob").await.unwrap();
        assert_eq!(alice.member_count(), 2);
    }

    #[tokio::test]
    async fn test_capacity_rejects_outgoing_connect() {
        let hub = ChannelHub::new();
        let alice = MeshCoordinator::new(
            hub.transport_with_id("alice"),
            MeshConfig {
                capacity: 2,
                ..Default::default()
            },
        );
        let bob = coordinator(&hub, "bob");
        let carol = coordinator(&hub, "carol");
        alice.join_room("lounge").await.unwrap();
        bob.join_room("lounge").await.unwrap();
        carol.join_room("lounge").await.unwrap();

        alice.connect_to_peer("bob").await.unwrap();
        settle().await;
        assert!(alice.is_room_full());

        let err = alice.connect_to_peer("carol").await.unwrap_err();
        assert!(matches!(err, Error::Mesh(MeshError::RoomFull(2))));
    }

    #[tokio::test]
    async fn test_full_room_rejects_incoming_before_membership() {
        let hub = ChannelHub::new();
        let alice = MeshCoordinator::new(
            hub.transport_with_id("alice"),
            MeshConfig {
                capacity: 2,
                ..Default::default()
            },
        );
        let bob = coordinator(&hub, "bob");
        let carol = coordinator(&hub, "carol");
        alice.join_room("lounge").await.unwrap();
        bob.join_room("lounge").await.unwrap();
        carol.join_room("lounge").await.unwrap();

        alice.connect_to_peer("bob").await.unwrap();
        settle().await;

        let rejections = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&rejections);
        carol.events().subscribe(move |event: &MeshEvent| {
            if let MeshEvent::RoomFull { message } = event {
                sink.lock().push(message.clone());
            }
        });

        // Carol dials a full room; alice must reject before admitting
        let _ = carol.connect_to_peer("alice").await;
        settle().await;

        assert_eq!(alice.member_count(), 2);
        assert!(!alice.members().contains(&"carol".to_string()));
        assert!(!rejections.lock().is_empty());
    }

    #[tokio::test]
    async fn test_peer_loss_removes_membership_and_notifies() {
        let hub = ChannelHub::new();
        let alice = coordinator(&hub, "alice");
        let bob = coordinator(&hub, "bob");
        alice.join_room("lounge").await.unwrap();
        bob.join_room("lounge").await.unwrap();
        alice.connect_to_peer("bob").await.unwrap();
        settle().await;

        let losses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&losses);
        alice.events().subscribe(move |event: &MeshEvent| {
            if let MeshEvent::PeerLeft { peer_id, .. } = event {
                sink.lock().push(peer_id.clone());
            }
        });

        bob.leave_room().await.unwrap();
        settle().await;

        assert_eq!(alice.member_count(), 1);
        assert_eq!(*losses.lock(), vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshot_merge_only_adds() {
        let hub = ChannelHub::new();
        let alice = coordinator(&hub, "alice");
        let bob = hub.transport_with_id("bob");
        alice.join_room("lounge").await.unwrap();
        alice.connect_to_peer("bob").await.unwrap();
        settle().await;

        // A stale snapshot from bob missing bob himself must not remove him
        bob.send(
            "alice",
            &PeerMessage::PeerList {
                peers: vec!["alice".into(), "dave".into()],
            },
        )
        .unwrap();
        settle().await;

        let members = alice.members();
        assert!(members.contains(&"bob".to_string()));
        assert!(members.contains(&"dave".to_string()));
    }

    #[tokio::test]
    async fn test_snapshot_from_unadmitted_sender_is_dropped() {
        let hub = ChannelHub::new();
        let alice = coordinator(&hub, "alice");
        alice.join_room("lounge").await.unwrap();

        // Mallory never passed admission; her snapshot must not grow the mesh
        let mallory = hub.transport_with_id("mallory");
        mallory
            .send(
                "alice",
                &PeerMessage::PeerList {
                    peers: vec!["mallory".into(), "eve".into()],
                },
            )
            .unwrap();
        settle().await;

        assert_eq!(alice.members(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshot_merge_respects_capacity() {
        let hub = ChannelHub::new();
        let alice = MeshCoordinator::new(
            hub.transport_with_id("alice"),
            MeshConfig {
                capacity: 2,
                ..Default::default()
            },
        );
        let bob = hub.transport_with_id("bob");
        alice.join_room("lounge").await.unwrap();
        alice.connect_to_peer("bob").await.unwrap();
        settle().await;
        assert!(alice.is_room_full());

        // Even an admitted member cannot push the mesh past the cap
        bob.send(
            "alice",
            &PeerMessage::PeerList {
                peers: vec!["carol".into(), "dave".into()],
            },
        )
        .unwrap();
        settle().await;

        assert_eq!(alice.member_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redial_rechecks_capacity_before_admission() {
        let hub = ChannelHub::new();
        let alice = MeshCoordinator::new(
            hub.transport_with_id("alice"),
            MeshConfig {
                capacity: 2,
                ..Default::default()
            },
        );
        let bob = coordinator(&hub, "bob");
        alice.join_room("lounge").await.unwrap();
        bob.join_room("lounge").await.unwrap();

        // Dave is offline: the dial fails and a retry is scheduled
        assert!(alice.connect_to_peer("dave").await.is_err());
        assert_eq!(
            alice.connection_state("dave"),
            Some(ConnectionState::Failed)
        );

        // The room fills while the retry timer is pending
        alice.connect_to_peer("bob").await.unwrap();
        settle().await;
        assert!(alice.is_room_full());

        // Dave comes online; the fired retry must be refused, not admitted
        let _dave = hub.transport_with_id("dave");
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        settle().await;

        assert_eq!(alice.member_count(), 2);
        assert!(!alice.members().contains(&"dave".to_string()));
        assert_eq!(
            alice.connection_state("dave"),
            Some(ConnectionState::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_peer_loss_closes_machine() {
        let hub = ChannelHub::new();
        let alice = coordinator(&hub, "alice");
        let bob = coordinator(&hub, "bob");
        alice.join_room("lounge").await.unwrap();
        bob.join_room("lounge").await.unwrap();
        alice.connect_to_peer("bob").await.unwrap();
        settle().await;

        let machine = alice.state.lock().machines.get("bob").cloned().unwrap();
        assert_eq!(machine.state(), ConnectionState::Connected);

        bob.leave_room().await.unwrap();
        settle().await;

        assert_eq!(machine.state(), ConnectionState::Closed);
        assert_eq!(alice.connection_state("bob"), None);
    }

    #[tokio::test]
    async fn test_position_update_drives_audio_engine() {
        let hub = ChannelHub::new();
        let alice = coordinator(&hub, "alice");
        let bob = coordinator(&hub, "bob");

        let engine = Arc::new(SpatialAudioEngine::new(
            Box::new(SoftwareBackend),
            ZoneRegistry::builtin(),
        ));
        engine.initialize().unwrap();
        alice.attach_audio(Arc::clone(&engine));

        alice.join_room("lounge").await.unwrap();
        bob.join_room("lounge").await.unwrap();
        alice.connect_to_peer("bob").await.unwrap();
        settle().await;

        bob.broadcast_position(&Position::new(8.0, 0.0).in_zone("gaming"));
        settle().await;

        assert_eq!(engine.target_volume_of("bob"), Some(0.5));
        assert_eq!(engine.distance_to("bob"), Some(8.0));
    }

    #[tokio::test]
    async fn test_chat_round_trip() {
        let hub = ChannelHub::new();
        let alice = coordinator(&hub, "alice");
        let bob = coordinator(&hub, "bob");
        alice.join_room("lounge").await.unwrap();
        bob.join_room("lounge").await.unwrap();
        alice.connect_to_peer("bob").await.unwrap();
        settle().await;

        let chats = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&chats);
        bob.events().subscribe(move |event: &MeshEvent| {
            if let MeshEvent::ChatMessage { peer_id, text, .. } = event {
                sink.lock().push((peer_id.clone(), text.clone()));
            }
        });

        alice.send_chat("round of drinks on me");
        settle().await;

        assert_eq!(
            *chats.lock(),
            vec![("alice".to_string(), "round of drinks on me".to_string())]
        );
    }

    #[tokio::test]
    async fn test_microphone_toggle_emits_events() {
        let hub = ChannelHub::new();
        let alice = coordinator(&hub, "alice");
        alice.attach_microphone(Arc::new(crate::audio::LocalMicrophone::new("mic")));

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        alice.events().subscribe(move |event: &MeshEvent| {
            if matches!(
                event,
                MeshEvent::MicrophoneMuted | MeshEvent::MicrophoneUnmuted
            ) {
                sink.lock().push(event.clone());
            }
        });

        assert_eq!(alice.toggle_microphone(), Some(true));
        assert_eq!(alice.toggle_microphone(), Some(false));
        assert_eq!(
            *events.lock(),
            vec![MeshEvent::MicrophoneMuted, MeshEvent::MicrophoneUnmuted]
        );
    }
}
