//! Error types for the voicemesh crate

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Zone error: {0}")]
    Zone(#[from] ZoneError),

    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),

    #[error("Signaling error: {0}")]
    Signal(#[from] SignalError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Spatial audio engine errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Engine not initialized (audio output not yet acquired)")]
    NotInitialized,

    #[error("Audio output acquisition failed: {0}")]
    OutputUnavailable(String),

    #[error("Invalid master volume: {0} (must be in [0, 1])")]
    InvalidMasterVolume(f32),
}

/// Zone acoustic model errors
#[derive(Error, Debug)]
pub enum ZoneError {
    #[error("Unknown zone: {0}")]
    UnknownZone(String),

    #[error("Falloff distance must be greater than 0, got {0}")]
    InvalidFalloffDistance(f32),

    #[error("Distance cannot be negative, got {0}")]
    NegativeDistance(f32),
}

/// Peer mesh errors
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Already joined a room")]
    AlreadyJoined,

    #[error("No room joined")]
    NotJoined,

    #[error("Room is full ({0} user limit)")]
    RoomFull(usize),

    #[error("Peer not connected: {0}")]
    PeerNotConnected(String),

    #[error("Connection to {peer_id} failed: {reason}")]
    ConnectFailed { peer_id: String, reason: String },

    #[error("Operation timed out")]
    Timeout,
}

/// Rendezvous protocol errors
#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Not connected to rendezvous server")]
    NotConnected,

    #[error("Server error: {0}")]
    Server(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
