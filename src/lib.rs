//! # Voicemesh
//!
//! Spatial voice chat over a capacity-bounded full-mesh peer network.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        RENDEZVOUS SERVER                          │
//! │   Room registry (room id -> members, conn -> peer reverse map)    │
//! │   join / leave / ping over persistent WebSocket connections       │
//! └───────▲──────────────────────▲──────────────────────▲────────────┘
//!         │ discover             │                      │
//! ┌───────┴────────┐    ┌────────┴───────┐     ┌────────┴───────┐
//! │    PEER A      │    │     PEER B     │     │     PEER C     │
//! │ ┌────────────┐ │    │                │     │                │
//! │ │ Mesh       │◄┼────┼───direct───────┼─────┼──connections───┤
//! │ │ Coordinator│ │    │  (full mesh, one state machine each)  │
//! │ └─────┬──────┘ │    │                │     │                │
//! │       │ position/chat/peer_list      │     │                │
//! │ ┌─────▼──────┐ │    └────────────────┘     └────────────────┘
//! │ │ Spatial    │ │
//! │ │ Audio      │ │   one gain control per remote source,
//! │ │ Engine     │ │   volume from zone falloff curves,
//! │ └────────────┘ │   50ms linear ramps against clicks
//! └────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod mesh;
pub mod protocol;
pub mod rendezvous;
pub mod zones;

pub use error::{Error, Result};

/// Opaque peer identifier, globally unique per session.
pub type PeerId = String;

/// Application-wide constants
pub mod constants {
    /// Hard capacity limit for a room (rendezvous and mesh enforce it alike)
    pub const ROOM_CAPACITY: usize = 10;

    /// Maximum automatic reconnection attempts per peer connection
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

    /// Initial reconnection backoff delay in milliseconds
    pub const BASE_RECONNECT_DELAY_MS: u64 = 1_000;

    /// Reconnection backoff cap in milliseconds
    pub const MAX_RECONNECT_DELAY_MS: u64 = 30_000;

    /// Linear gain ramp duration in milliseconds (click avoidance)
    pub const GAIN_RAMP_MS: u64 = 50;

    /// Default port for the rendezvous server
    pub const DEFAULT_RENDEZVOUS_PORT: u16 = 9000;

    /// Interval between liveness pings to the rendezvous server, in seconds
    pub const PING_INTERVAL_SECS: u64 = 30;

    /// Zone used when a position update carries no zone id
    pub const DEFAULT_ZONE: &str = "central_bar";

    /// Walking speed in spatial units per second, for crossfade estimation
    pub const WALKING_SPEED: f32 = 3.0;

    /// Default timeout for peer discovery and direct connection attempts
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
}
