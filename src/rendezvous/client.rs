//! Rendezvous client: event-stream facade over the WebSocket protocol
//!
//! A connection actor owns the socket. Callers hand it commands over a
//! channel and consume [`RendezvousEvent`]s from the receiver returned by
//! [`RendezvousClient::connect`]. The actor pings the server periodically
//! and reconnects with exponential backoff when the socket drops, rejoining
//! the last room automatically.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::constants::{BASE_RECONNECT_DELAY_MS, MAX_RECONNECT_DELAY_MS, PING_INTERVAL_SECS};
use crate::error::SignalError;
use crate::protocol::{ClientMessage, ServerMessage};

/// Reconnection attempts before the client gives up on the server
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection-level and room-level events surfaced to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum RendezvousEvent {
    /// Socket established (also after a successful reconnect)
    Connected,
    /// Socket lost; the actor will try to reconnect
    Disconnected,
    /// Server greeting
    Welcome { message: String },
    /// Membership snapshot sent to us on join
    PeerList { peers: Vec<String>, room_id: String },
    /// Another peer entered the room
    PeerJoined { peer_id: String, peers: Vec<String> },
    /// A peer left the room
    PeerLeft { peer_id: String, peers: Vec<String> },
    /// Our join was rejected, the room is at capacity
    RoomFull { message: String },
    /// Server-reported protocol error
    Error { message: String },
    /// All reconnection attempts exhausted; the stream ends after this
    ReconnectFailed,
}

#[derive(Debug)]
enum Command {
    Join { room_id: String, peer_id: String },
    Leave,
    Shutdown,
}

/// Handle to the connection actor
#[derive(Debug)]
pub struct RendezvousClient {
    commands: mpsc::UnboundedSender<Command>,
}

impl RendezvousClient {
    /// Connect to a rendezvous server and start the connection actor.
    /// Returns the handle plus the event stream.
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RendezvousEvent>), SignalError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| SignalError::ConnectionFailed(e.to_string()))?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            url: url.to_string(),
            session: None,
            events: event_tx,
        };
        tokio::spawn(actor.run(ws, command_rx));

        Ok((Self { commands: command_tx }, event_rx))
    }

    /// Join a room under the given peer identity
    pub fn join(&self, room_id: &str, peer_id: &str) -> Result<(), SignalError> {
        self.commands
            .send(Command::Join {
                room_id: room_id.to_string(),
                peer_id: peer_id.to_string(),
            })
            .map_err(|_| SignalError::NotConnected)
    }

    /// Leave the current room, keeping the socket open
    pub fn leave(&self) -> Result<(), SignalError> {
        self.commands
            .send(Command::Leave)
            .map_err(|_| SignalError::NotConnected)
    }

    /// Close the socket and stop the actor
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct Actor {
    url: String,
    /// Last joined (room_id, peer_id), for automatic rejoin after reconnect
    session: Option<(String, String)>,
    events: mpsc::UnboundedSender<RendezvousEvent>,
}

enum Exit {
    Shutdown,
    ConnectionLost,
}

impl Actor {
    async fn run(mut self, mut ws: WsStream, mut commands: mpsc::UnboundedReceiver<Command>) {
        let _ = self.events.send(RendezvousEvent::Connected);

        loop {
            match self.drive(&mut ws, &mut commands).await {
                Exit::Shutdown => break,
                Exit::ConnectionLost => {
                    let _ = self.events.send(RendezvousEvent::Disconnected);
                    match self.reconnect().await {
                        Some(stream) => ws = stream,
                        None => {
                            let _ = self.events.send(RendezvousEvent::ReconnectFailed);
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Pump one socket lifetime: commands out, server messages in,
    /// periodic pings
    async fn drive(
        &mut self,
        ws: &mut WsStream,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Exit {
        let period = Duration::from_secs(PING_INTERVAL_SECS);
        let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    if !self.send(ws, &ClientMessage::Ping).await {
                        return Exit::ConnectionLost;
                    }
                }
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => {
                        let _ = ws.close(None).await;
                        return Exit::Shutdown;
                    }
                    Some(Command::Join { room_id, peer_id }) => {
                        let message = ClientMessage::Join {
                            room_id: room_id.clone(),
                            peer_id: peer_id.clone(),
                        };
                        self.session = Some((room_id, peer_id));
                        if !self.send(ws, &message).await {
                            return Exit::ConnectionLost;
                        }
                    }
                    Some(Command::Leave) => {
                        if let Some((room_id, peer_id)) = self.session.take() {
                            let message = ClientMessage::Leave { room_id, peer_id };
                            if !self.send(ws, &message).await {
                                return Exit::ConnectionLost;
                            }
                        }
                    }
                },
                frame = ws.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => self.handle_server_message(&text),
                    Some(Ok(WsMessage::Close(_))) | None => return Exit::ConnectionLost,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("Rendezvous socket error: {}", e);
                        return Exit::ConnectionLost;
                    }
                },
            }
        }
    }

    fn handle_server_message(&mut self, text: &str) {
        let message: ServerMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Unparseable server message: {}", e);
                return;
            }
        };

        let event = match message {
            ServerMessage::Welcome { message } => RendezvousEvent::Welcome { message },
            ServerMessage::PeerList { peers, room_id } => {
                RendezvousEvent::PeerList { peers, room_id }
            }
            ServerMessage::PeerJoined { peer_id, peers } => {
                RendezvousEvent::PeerJoined { peer_id, peers }
            }
            ServerMessage::PeerLeft { peer_id, peers } => {
                RendezvousEvent::PeerLeft { peer_id, peers }
            }
            ServerMessage::RoomFull { message } => {
                // Join rejected; do not rejoin this room on reconnect
                self.session = None;
                RendezvousEvent::RoomFull { message }
            }
            ServerMessage::Error { message } => RendezvousEvent::Error { message },
            ServerMessage::Pong => return,
        };
        let _ = self.events.send(event);
    }

    async fn send(&self, ws: &mut WsStream, message: &ClientMessage) -> bool {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to encode client message: {}", e);
                return true;
            }
        };
        match ws.send(WsMessage::Text(text)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Rendezvous send failed: {}", e);
                false
            }
        }
    }

    /// Dial the server again with exponential backoff. Returns `None` once
    /// all attempts are spent.
    async fn reconnect(&mut self) -> Option<WsStream> {
        for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
            tokio::time::sleep(reconnect_delay(attempt)).await;
            tracing::info!(
                "Rendezvous reconnect attempt {}/{}",
                attempt,
                MAX_RECONNECT_ATTEMPTS
            );
            match connect_async(&self.url).await {
                Ok((mut ws, _)) => {
                    let _ = self.events.send(RendezvousEvent::Connected);
                    if let Some((room_id, peer_id)) = self.session.clone() {
                        let message = ClientMessage::Join { room_id, peer_id };
                        if !self.send(&mut ws, &message).await {
                            continue;
                        }
                    }
                    return Some(ws);
                }
                Err(e) => {
                    tracing::warn!("Reconnect attempt {} failed: {}", attempt, e);
                }
            }
        }
        None
    }
}

fn reconnect_delay(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let millis = BASE_RECONNECT_DELAY_MS
        .saturating_mul(1 << shift)
        .min(MAX_RECONNECT_DELAY_MS);
    Duration::from_millis(millis)
}
