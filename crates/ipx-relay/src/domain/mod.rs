//! Domain layer for ipx-relay.
//!
//! Plain types with no I/O: the relay configuration and the
//! [`ClientHandle`] abstraction that decouples routing from sockets.

pub mod config;
pub mod handle;

pub use config::{ConfigError, RelayConfig, TransportKind, DEFAULT_PORT};
pub use handle::{same_handle, ClientHandle, HandleError, SharedHandle};
