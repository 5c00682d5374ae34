//! ipx-relay library crate.
//!
//! A relay that lets emulated DOS games play IPX network games over the
//! internet.  Each client connects over WebSocket or TCP, asks the relay for
//! an address, and from then on the relay forwards its IPX frames to one
//! other client or, for broadcasts, to everyone in the same room.
//!
//! # Architecture
//!
//! ```text
//! client (WebSocket /ipx/<room> or TCP)
//!         ↕
//! [ipx-relay]
//!   ├── domain/           RelayConfig, ClientHandle trait
//!   ├── application/      registry (rooms), relay engine, watchdog
//!   └── infrastructure/
//!         ├── server          accept loop and wiring
//!         ├── ws_transport    upgrade checks, one frame per message
//!         ├── tcp_transport   stream framing via ipx-core
//!         ├── session         per-connection handle, queue and cleanup
//!         ├── liveness        HTTP liveness probe (reqwest)
//!         └── config_file     optional TOML file
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` depends on `domain` and `ipx-core`; it never touches sockets.
//! - `infrastructure` depends on all other layers plus `tokio`,
//!   `tokio-tungstenite` and `reqwest`.

/// Domain layer: configuration and the client handle abstraction.
pub mod domain;

/// Application layer: registry, routing and the watchdog.
pub mod application;

/// Infrastructure layer: listeners, transports and external I/O.
pub mod infrastructure;
