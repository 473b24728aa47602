//! Rendezvous service: out-of-mesh peer discovery
//!
//! Participants contact this service first to find each other. The server
//! keeps a process-wide room registry and pushes membership deltas over
//! persistent WebSocket connections; the client wraps that protocol behind
//! an event stream with automatic reconnection.

pub mod client;
pub mod registry;
pub mod server;

pub use client::{RendezvousClient, RendezvousEvent};
pub use registry::{ClientHandle, RoomRegistry};
pub use server::{router, serve};
