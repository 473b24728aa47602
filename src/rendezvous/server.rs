//! WebSocket front end for the room registry
//!
//! One axum route upgrades to WebSocket; each connection gets a writer task
//! draining an unbounded queue so registry code never awaits a slow socket.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::protocol::ServerMessage;
use crate::rendezvous::registry::{ClientHandle, RoomRegistry};
use crate::Result;

/// Build the rendezvous router: a health probe and the WebSocket endpoint
pub fn router(registry: Arc<RoomRegistry>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/ws", get(upgrade))
        .with_state(registry)
}

/// Bind and serve until the process exits
pub async fn serve(registry: Arc<RoomRegistry>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Rendezvous server listening on {}", addr);
    tracing::info!("WebSocket endpoint: ws://{}/ws", addr);
    axum::serve(listener, router(registry)).await?;
    Ok(())
}

async fn health() -> &'static str {
    "Voicemesh rendezvous server\n"
}

async fn upgrade(ws: WebSocketUpgrade, State(registry): State<Arc<RoomRegistry>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

async fn handle_socket(socket: WebSocket, registry: Arc<RoomRegistry>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let handle = ClientHandle::new(tx);
    let connection_id = handle.id();
    tracing::info!("New connection {}", connection_id);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    handle.send(ServerMessage::Welcome {
        message: "Connected to voicemesh rendezvous server".into(),
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => registry.handle_message(&handle, &text),
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // binary/ping/pong: nothing to do
            Err(e) => {
                tracing::warn!("Connection {} errored: {}", connection_id, e);
                break;
            }
        }
    }

    registry.disconnect(connection_id);
    writer.abort();
    tracing::info!("Connection {} closed", connection_id);
}
