//! Infrastructure layer for ipx-relay.
//!
//! Sockets and processes: the accept loop, the WebSocket and TCP transports,
//! per-connection sessions, the HTTP liveness probe and the TOML config file.

pub mod config_file;
pub mod liveness;
pub mod server;
pub mod session;
pub mod tcp_transport;
pub mod ws_transport;

pub use config_file::{ConfigFileError, RelayFileConfig};
pub use server::{run_server, RelayServer};
