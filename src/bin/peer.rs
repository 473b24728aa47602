//! Peer Demo Application
//!
//! Simulates a three-peer room in process: peers join through an in-process
//! transport hub, one listener walks past the others, and the spatial engine
//! prints the distance and gain target for every remote source along the way.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voicemesh::audio::{LocalMicrophone, SoftwareBackend, SpatialAudioEngine};
use voicemesh::config::AppConfig;
use voicemesh::events::MeshEvent;
use voicemesh::mesh::{ChannelHub, MeshCoordinator};
use voicemesh::zones::{Position, ZoneRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting voicemesh peer demo");

    let config = AppConfig::load_default()?;
    let mesh_config = config.mesh.to_mesh_config();

    let hub = ChannelHub::new();
    let alice = MeshCoordinator::new(hub.transport_with_id("alice"), mesh_config.clone());
    let bob = MeshCoordinator::new(hub.transport_with_id("bob"), mesh_config.clone());
    let carol = MeshCoordinator::new(hub.transport_with_id("carol"), mesh_config);

    // Alice is the listener; her engine drives the printed volumes
    let engine = Arc::new(SpatialAudioEngine::new(
        Box::new(SoftwareBackend),
        ZoneRegistry::builtin(),
    ));
    engine.initialize()?;
    engine.set_master_volume(config.audio.master_volume)?;
    engine.set_spatial_enabled(config.audio.spatial_enabled);
    alice.attach_audio(Arc::clone(&engine));
    alice.attach_microphone(Arc::new(LocalMicrophone::new("alice/mic")));

    alice.events().subscribe(|event: &MeshEvent| match event {
        MeshEvent::PeerJoined { peer_id, room_size } => {
            println!("+ {peer_id} joined ({room_size} in room)");
        }
        MeshEvent::PeerLeft { peer_id, .. } => println!("- {peer_id} left"),
        MeshEvent::ChatMessage { peer_id, text, .. } => println!("  {peer_id}: {text}"),
        _ => {}
    });

    alice.join_room("tavern").await?;
    bob.join_room("tavern").await?;
    carol.join_room("tavern").await?;
    bob.connect_to_peer("alice").await?;
    carol.connect_to_peer("alice").await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Bob chats from the bar, Carol plays at the card tables
    bob.broadcast_position(&Position::new(6.0, 0.0).in_zone("central_bar"));
    carol.broadcast_position(&Position::new(14.0, 3.0).in_zone("card_tables"));
    bob.send_chat("over here!");
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Alice walks from the entrance past Bob toward Carol
    println!("\n  x      bob: dist vol     carol: dist vol");
    for step in 0..=8 {
        let x = step as f32 * 2.0;
        engine.update_listener_position(Position::new(x, 0.0));
        alice.broadcast_position(&Position::new(x, 0.0));

        let report = |peer: &str| {
            let distance = engine.distance_to(peer).unwrap_or(f32::NAN);
            let volume = engine.target_volume_of(peer).unwrap_or(f32::NAN);
            format!("{distance:5.1} {volume:.2}")
        };
        println!("  {:4.1}      {}          {}", x, report("bob"), report("carol"));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if let Some(muted) = alice.toggle_microphone() {
        println!("\nmicrophone muted: {muted}");
    }

    carol.leave_room().await?;
    bob.leave_room().await?;
    alice.leave_room().await?;
    engine.shutdown();

    tracing::info!("Demo complete");
    Ok(())
}
