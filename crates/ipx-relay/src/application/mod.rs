//! Application layer for ipx-relay.
//!
//! Everything here is synchronous in-memory logic plus the watchdog loop:
//!
//! - [`registry`]: who is connected, per room
//! - [`relay_engine`]: what to do with each inbound frame
//! - [`watchdog`]: when the process should stop
//!
//! Sockets, handshakes and task spawning belong to the infrastructure layer.

pub mod registry;
pub mod relay_engine;
pub mod watchdog;

pub use registry::{peer_key, ClientRegistry, RoomRegistry};
pub use relay_engine::{RelayEngine, RelayError, RouteOutcome};
pub use watchdog::{
    ActivityClock, LivenessProbe, ProbeError, ShutdownReason, Watchdog, LIVENESS_PAYLOAD,
};
