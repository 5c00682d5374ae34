//! Protocol module containing the header codec, address translation and framing.

pub mod address;
pub mod codec;
pub mod framing;

pub use address::{to_address, to_endpoint, AddressError, TransportAddress};
pub use codec::{IpxHeader, ProtocolError, HEADER_SIZE};
pub use framing::IpxFrameCodec;
