//! Raw TCP transport.
//!
//! TCP clients share the process-global scope.  The byte stream is cut into
//! frames by [`IpxFrameCodec`]; a framing error (a declared length below 4 or
//! above the configured maximum) leaves the stream unrecoverable, so the
//! connection is closed.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use futures_util::StreamExt;
use ipx_core::IpxFrameCodec;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::application::RelayEngine;
use crate::domain::RelayConfig;
use crate::infrastructure::session::{pump_outbound, Session};

/// Runs one TCP client until it disconnects, is replaced, or sends an
/// unframeable stream.
///
/// # Errors
///
/// Returns an error if the peer cannot be registered.
pub async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    engine: Arc<RelayEngine>,
    config: Arc<RelayConfig>,
) -> anyhow::Result<()> {
    // Frames are small and latency-sensitive.
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, "failed to set TCP_NODELAY: {e}");
    }

    let (session, rx) = Session::open(engine, peer, None, config.outbound_queue)
        .with_context(|| format!("cannot register {peer}"))?;

    let codec = IpxFrameCodec::new(config.max_frame_len);
    let (read_half, write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, codec);
    let writer = tokio::spawn(pump_outbound(
        rx,
        FramedWrite::new(write_half, codec),
        |frame: Bytes| frame,
    ));

    loop {
        tokio::select! {
            _ = session.handle().closed() => {
                debug!(id = %session.handle().id(), "connection replaced; closing");
                break;
            }
            item = frames.next() => match item {
                Some(Ok(frame)) => session.route(frame.freeze()),
                Some(Err(e)) => {
                    warn!(%peer, "closing unframeable stream: {e}");
                    break;
                }
                None => break,
            },
        }
    }

    drop(session);
    writer.abort();
    Ok(())
}
