//! Binary codec for the fixed IPX header.
//!
//! Wire format (30 bytes, big-endian, no padding):
//! ```text
//! [checksum:2][length:2][transport_control:1][packet_type:1]
//! [dest.network:4][dest.host:4][dest.port:2][dest.socket:2]
//! [src.network:4][src.host:4][src.port:2][src.socket:2]
//! ```
//! `length` is the length of the whole frame, header included.  The checksum
//! is carried through untouched; IPX over a relay never computes it.

use std::net::SocketAddr;

use thiserror::Error;

use crate::protocol::address::{AddressError, TransportAddress};

/// Size of the IPX header in bytes.
pub const HEADER_SIZE: usize = 30;

/// IPX socket number the registration handshake is addressed to.
pub const REGISTRATION_SOCKET: u16 = 0x2;

/// Destination host value reserved for "every other peer in scope".
pub const BROADCAST_HOST: u32 = 0xFFFF_FFFF;

/// Checksum value stamped on registration replies ("no checksum" in IPX).
pub const NO_CHECKSUM: u16 = 0xFFFF;

const DEST_OFFSET: usize = 6;
const SRC_OFFSET: usize = 18;

/// Errors raised while parsing or framing IPX traffic.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is too short to hold the header.
    #[error("malformed frame: need at least {needed} bytes, got {available}")]
    MalformedFrame { needed: usize, available: usize },

    /// The length field is smaller than the length field itself, so the
    /// stream can never advance past it.
    #[error("declared frame length {declared} cannot hold the length field")]
    InvalidLength { declared: usize },

    /// The length field exceeds the transport's configured maximum.
    #[error("frame of {declared} bytes exceeds the {max}-byte limit")]
    FrameTooLarge { declared: usize, max: usize },

    /// The underlying byte stream failed.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The 30-byte header that starts every IPX frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpxHeader {
    pub checksum: u16,
    pub length: u16,
    pub transport_control: u8,
    pub packet_type: u8,
    pub dest: TransportAddress,
    pub src: TransportAddress,
}

impl IpxHeader {
    /// Encodes the header into its 30-byte wire form.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ipx_core::protocol::codec::{IpxHeader, HEADER_SIZE};
    ///
    /// let header = IpxHeader { length: 30, ..IpxHeader::default() };
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), HEADER_SIZE);
    /// assert_eq!(IpxHeader::decode(&bytes), header);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.checksum.to_be_bytes());
        buf[2..4].copy_from_slice(&self.length.to_be_bytes());
        buf[4] = self.transport_control;
        buf[5] = self.packet_type;
        write_address(&mut buf, DEST_OFFSET, &self.dest);
        write_address(&mut buf, SRC_OFFSET, &self.src);
        buf
    }

    /// Best-effort decode: reads every field that is fully present in `bytes`
    /// and leaves the rest at zero.  Never fails and never panics.
    ///
    /// Bytes past the header (the payload) are ignored.
    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            checksum: read_u16(bytes, 0).unwrap_or(0),
            length: read_u16(bytes, 2).unwrap_or(0),
            transport_control: bytes.get(4).copied().unwrap_or(0),
            packet_type: bytes.get(5).copied().unwrap_or(0),
            dest: read_address(bytes, DEST_OFFSET),
            src: read_address(bytes, SRC_OFFSET),
        }
    }

    /// Strict decode used before routing.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedFrame`] if `bytes` is shorter than
    /// [`HEADER_SIZE`]; zero-filled addresses would otherwise misroute.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedFrame {
                needed: HEADER_SIZE,
                available: bytes.len(),
            });
        }
        Ok(Self::decode(bytes))
    }

    /// True for the "assign me an address" handshake: destination socket 2
    /// on host 0.
    pub fn is_registration_request(&self) -> bool {
        self.dest.socket == REGISTRATION_SOCKET && self.dest.host == 0
    }

    /// True when the destination is the reserved broadcast host.
    pub fn is_broadcast(&self) -> bool {
        self.dest.host == BROADCAST_HOST
    }

    /// Builds the reply to a registration request.
    ///
    /// `dest` is the requesting client's translated endpoint on network 0,
    /// `src` the relay's well-known endpoint on network 1; both on socket 2.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] if either endpoint has no IPv4 form.
    pub fn registration_reply(client: SocketAddr, server: SocketAddr) -> Result<Self, AddressError> {
        let mut dest = TransportAddress::from_socket_addr(client)?;
        dest.network = 0;
        dest.socket = REGISTRATION_SOCKET;

        let mut src = TransportAddress::from_socket_addr(server)?;
        src.network = 1;
        src.socket = REGISTRATION_SOCKET;

        Ok(Self {
            checksum: NO_CHECKSUM,
            length: HEADER_SIZE as u16,
            transport_control: 0,
            packet_type: 0,
            dest,
            src,
        })
    }
}

// ── Field helpers ─────────────────────────────────────────────────────────────

fn write_address(buf: &mut [u8; HEADER_SIZE], offset: usize, addr: &TransportAddress) {
    buf[offset..offset + 4].copy_from_slice(&addr.network.to_be_bytes());
    buf[offset + 4..offset + 8].copy_from_slice(&addr.host.to_be_bytes());
    buf[offset + 8..offset + 10].copy_from_slice(&addr.port.to_be_bytes());
    buf[offset + 10..offset + 12].copy_from_slice(&addr.socket.to_be_bytes());
}

fn read_address(bytes: &[u8], offset: usize) -> TransportAddress {
    TransportAddress {
        network: read_u32(bytes, offset).unwrap_or(0),
        host: read_u32(bytes, offset + 4).unwrap_or(0),
        port: read_u16(bytes, offset + 8).unwrap_or(0),
        socket: read_u16(bytes, offset + 10).unwrap_or(0),
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw = bytes.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([raw[0], raw[1]]))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> IpxHeader {
        IpxHeader {
            checksum: 0xFFFF,
            length: 62,
            transport_control: 3,
            packet_type: 4,
            dest: TransportAddress {
                network: 0,
                host: 0xC0A8_0001,
                port: 4000,
                socket: 0x4002,
            },
            src: TransportAddress {
                network: 0x0102_0304,
                host: 0x0A00_0005,
                port: 213,
                socket: 0x869C,
            },
        }
    }

    #[test]
    fn test_encode_writes_fields_at_wire_offsets() {
        // Arrange
        let header = sample_header();

        // Act
        let bytes = header.encode();

        // Assert: spot-check every field boundary of the wire table
        assert_eq!(&bytes[0..2], &[0xFF, 0xFF]);
        assert_eq!(&bytes[2..4], &[0x00, 62]);
        assert_eq!(bytes[4], 3);
        assert_eq!(bytes[5], 4);
        assert_eq!(&bytes[6..10], &[0, 0, 0, 0]);
        assert_eq!(&bytes[10..14], &[0xC0, 0xA8, 0x00, 0x01]);
        assert_eq!(&bytes[14..16], &4000u16.to_be_bytes());
        assert_eq!(&bytes[16..18], &[0x40, 0x02]);
        assert_eq!(&bytes[18..22], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[22..26], &[0x0A, 0x00, 0x00, 0x05]);
        assert_eq!(&bytes[26..28], &213u16.to_be_bytes());
        assert_eq!(&bytes[28..30], &[0x86, 0x9C]);
    }

    #[test]
    fn test_decode_inverts_encode() {
        let header = sample_header();
        assert_eq!(IpxHeader::decode(&header.encode()), header);
    }

    #[test]
    fn test_decode_ignores_payload_bytes() {
        let header = sample_header();
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(&[0xAA; 32]);
        assert_eq!(IpxHeader::decode(&frame), header);
    }

    #[test]
    fn test_decode_short_input_zero_fills_missing_fields() {
        let bytes = sample_header().encode();

        // Only checksum, length, tc, type and dest.network present.
        let decoded = IpxHeader::decode(&bytes[..10]);

        assert_eq!(decoded.checksum, 0xFFFF);
        assert_eq!(decoded.length, 62);
        assert_eq!(decoded.packet_type, 4);
        assert_eq!(decoded.dest.host, 0);
        assert_eq!(decoded.src, TransportAddress::default());
    }

    #[test]
    fn test_decode_partial_field_reads_as_zero() {
        // 11 bytes: dest.host has only one of its four bytes
        let bytes = sample_header().encode();
        let decoded = IpxHeader::decode(&bytes[..11]);
        assert_eq!(decoded.dest.host, 0);
    }

    #[test]
    fn test_decode_empty_input_is_all_zero() {
        assert_eq!(IpxHeader::decode(&[]), IpxHeader::default());
    }

    #[test]
    fn test_parse_rejects_short_frame() {
        let bytes = sample_header().encode();
        let result = IpxHeader::parse(&bytes[..29]);
        assert!(matches!(
            result,
            Err(ProtocolError::MalformedFrame {
                needed: 30,
                available: 29
            })
        ));
    }

    #[test]
    fn test_parse_accepts_exact_header() {
        let header = sample_header();
        assert_eq!(IpxHeader::parse(&header.encode()).unwrap(), header);
    }

    #[test]
    fn test_registration_request_classification() {
        let mut header = IpxHeader::default();
        header.dest.socket = REGISTRATION_SOCKET;
        assert!(header.is_registration_request());

        header.dest.host = 1;
        assert!(!header.is_registration_request());

        header.dest.host = 0;
        header.dest.socket = 0x4002;
        assert!(!header.is_registration_request());
    }

    #[test]
    fn test_broadcast_classification() {
        let mut header = sample_header();
        assert!(!header.is_broadcast());
        header.dest.host = BROADCAST_HOST;
        assert!(header.is_broadcast());
    }

    #[test]
    fn test_registration_reply_fields() {
        // Arrange
        let client: SocketAddr = "203.0.113.5:4000".parse().unwrap();
        let server: SocketAddr = "127.0.0.1:1900".parse().unwrap();

        // Act
        let reply = IpxHeader::registration_reply(client, server).unwrap();

        // Assert
        assert_eq!(reply.checksum, 0xFFFF);
        assert_eq!(reply.length, 30);
        assert_eq!(reply.transport_control, 0);
        assert_eq!(reply.packet_type, 0);
        assert_eq!(reply.dest.network, 0);
        assert_eq!(reply.dest.socket, 0x2);
        assert_eq!(reply.dest.endpoint(), "203.0.113.5:4000");
        assert_eq!(reply.src.network, 1);
        assert_eq!(reply.src.socket, 0x2);
        assert_eq!(reply.src.endpoint(), "127.0.0.1:1900");
    }

    #[test]
    fn test_registration_reply_rejects_pure_ipv6_client() {
        let client: SocketAddr = "[2001:db8::7]:4000".parse().unwrap();
        let server: SocketAddr = "127.0.0.1:1900".parse().unwrap();
        assert!(IpxHeader::registration_reply(client, server).is_err());
    }
}
