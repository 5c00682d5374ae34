//! Length-delimited framing of IPX frames on byte-stream transports.
//!
//! WebSocket already delivers one frame per message, but a raw TCP stream does
//! not: one `read()` may return half a frame or several frames at once.  IPX
//! frames carry their own total length at header offset 2, so the decoder
//! peeks at that field and only splits a frame off the buffer once all of it
//! has arrived.
//!
//! ```text
//! buffer: [ck ck LL LL ....frame 1 (LLLL bytes)....][ck ck LL LL ..frame 2..
//!                ^^^^^ peeked, not consumed, until LLLL bytes are buffered
//! ```
//!
//! [`IpxFrameCodec`] plugs into `tokio_util::codec::FramedRead`, which keeps
//! calling [`Decoder::decode`] while it returns frames, so back-to-back frames
//! in one read are emitted in order.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::protocol::codec::ProtocolError;

/// Bytes needed before the length field (offset 2..4) can be read.
pub const LENGTH_PREFIX: usize = 4;

/// Largest length the 16-bit length field can declare.
pub const MAX_WIRE_FRAME_LEN: usize = u16::MAX as usize;

/// Stream codec that cuts IPX frames out of a byte stream.
///
/// Decoding never consumes fewer or more bytes than a frame's declared
/// length.  Encoding writes frames verbatim; the relay never rewrites the
/// frames it forwards.
#[derive(Debug, Clone, Copy)]
pub struct IpxFrameCodec {
    max_frame_len: usize,
}

impl IpxFrameCodec {
    /// Creates a codec that rejects frames declaring more than
    /// `max_frame_len` bytes.
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Default for IpxFrameCodec {
    fn default() -> Self {
        Self::new(MAX_WIRE_FRAME_LEN)
    }
}

impl Decoder for IpxFrameCodec {
    type Item = BytesMut;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, ProtocolError> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let frame_len = u16::from_be_bytes([src[2], src[3]]) as usize;
        if frame_len < LENGTH_PREFIX {
            return Err(ProtocolError::InvalidLength {
                declared: frame_len,
            });
        }
        if frame_len > self.max_frame_len {
            return Err(ProtocolError::FrameTooLarge {
                declared: frame_len,
                max: self.max_frame_len,
            });
        }

        if src.len() < frame_len {
            // Leave the peeked prefix in place; make room for the remainder.
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        trace!(frame_len, buffered = src.len(), "framed IPX frame");
        Ok(Some(src.split_to(frame_len)))
    }
}

impl Encoder<Bytes> for IpxFrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.extend_from_slice(&frame);
        Ok(())
    }
}
