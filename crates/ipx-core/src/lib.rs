//! # ipx-core
//!
//! Shared protocol library for the IPX relay: the fixed 30-byte IPX header
//! codec, the translation between real network endpoints and IPX addresses,
//! and the length-prefixed stream framer used by byte-oriented transports.
//!
//! It has no dependencies on sockets, runtimes, or process state.
//!
//! # Architecture overview
//!
//! IPX is the LAN protocol DOS-era games used for multiplayer.  The relay lets
//! emulated games on different machines exchange IPX datagrams as if they sat
//! on the same segment: every client's real `ip:port` is folded into the IPX
//! address space, and the relay routes on the header's destination address.
//!
//! - **`protocol::codec`** – The 30-byte header and its big-endian encoding.
//! - **`protocol::address`** – `ip:port` ↔ IPX `host`/`port` translation.
//! - **`protocol::framing`** – Cuts a TCP byte stream back into frames using
//!   the header's length field.

pub mod protocol;

pub use protocol::address::{to_address, to_endpoint, AddressError, TransportAddress};
pub use protocol::codec::{IpxHeader, ProtocolError, HEADER_SIZE};
pub use protocol::framing::IpxFrameCodec;
