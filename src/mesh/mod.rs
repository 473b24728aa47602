//! Peer mesh: per-connection lifecycle machines, the transport seam, and the
//! coordinator that keeps a room's full mesh consistent

pub mod coordinator;
pub mod state_machine;
pub mod transport;

pub use coordinator::{MeshConfig, MeshCoordinator};
pub use state_machine::{ConnectionState, ConnectionStateMachine, MachineEvent, ReconnectPolicy};
pub use transport::{ChannelHub, ChannelTransport, Transport, TransportEvent};
