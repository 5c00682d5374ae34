//! Per-connection plumbing shared by both transports.
//!
//! Each accepted client gets:
//!
//! - a [`ConnectionHandle`]: the registry's [`ClientHandle`], backed by a
//!   bounded queue of outbound frames and a close signal;
//! - a writer task ([`pump_outbound`]) draining that queue into the socket;
//! - a [`Session`] owned by the reader task, which registers the client on
//!   open, routes every inbound frame, and releases the registry entry when
//!   dropped.
//!
//! Sending never blocks the caller: a full queue drops the frame, as a lost
//! datagram would be on a real IPX network.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Sink, SinkExt};
use ipx_core::AddressError;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::application::{peer_key, RelayEngine, RelayError};
use crate::domain::{ClientHandle, HandleError, SharedHandle};

/// The socket side of one client as seen by the registry.
pub struct ConnectionHandle {
    id: Uuid,
    peer: SocketAddr,
    outbound: mpsc::Sender<Bytes>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl ConnectionHandle {
    /// Creates a handle with room for `queue` pending frames, plus the
    /// receiving end for the writer task.
    pub fn new(peer: SocketAddr, queue: usize) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(queue.max(1));
        let handle = Arc::new(Self {
            id: Uuid::new_v4(),
            peer,
            outbound,
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        });
        (handle, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Completes once [`ClientHandle::close`] has been called.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        // `notify_one` stores a permit, so a close racing this call is not lost.
        self.close_signal.notified().await;
    }
}

impl ClientHandle for ConnectionHandle {
    fn send(&self, frame: Bytes) -> Result<(), HandleError> {
        if self.is_closed() {
            return Err(HandleError::Closed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HandleError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => HandleError::Closed,
        })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.close_signal.notify_one();
        }
    }
}

/// A registered client for the lifetime of its reader task.
pub struct Session {
    engine: Arc<RelayEngine>,
    handle: Arc<ConnectionHandle>,
    shared: SharedHandle,
    room: Option<String>,
    key: String,
}

impl Session {
    /// Registers a new client connected from `peer` in `room`.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] if `peer` has no IPv4 form; the client is
    /// not registered.
    pub fn open(
        engine: Arc<RelayEngine>,
        peer: SocketAddr,
        room: Option<String>,
        queue: usize,
    ) -> Result<(Self, mpsc::Receiver<Bytes>), AddressError> {
        let key = peer_key(peer)?;
        let (handle, rx) = ConnectionHandle::new(peer, queue);
        let shared: SharedHandle = handle.clone();

        engine
            .registry()
            .connect(room.as_deref(), &key, Arc::clone(&shared));
        info!(
            id = %handle.id(),
            %peer,
            room = room.as_deref().unwrap_or("-"),
            "client connected"
        );

        Ok((
            Self {
                engine,
                handle,
                shared,
                room,
                key,
            },
            rx,
        ))
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Routes one inbound frame.  Routing errors are logged and the frame is
    /// dropped; the connection stays open.
    pub fn route(&self, frame: Bytes) {
        match self
            .engine
            .handle_frame(&self.shared, self.handle.peer(), self.room(), frame)
        {
            Ok(outcome) => trace!(id = %self.handle.id(), ?outcome, "routed"),
            Err(RelayError::Reply(e)) => {
                debug!(id = %self.handle.id(), "registration reply dropped: {e}")
            }
            Err(e) => debug!(id = %self.handle.id(), "{e}"),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.handle.close();
        let released = self
            .engine
            .registry()
            .release(self.room.as_deref(), &self.key, &self.shared);
        info!(
            id = %self.handle.id(),
            peer = %self.handle.peer(),
            replaced = !released,
            "client disconnected"
        );
    }
}

/// Writes queued frames into `sink` until the queue closes or a write fails.
///
/// `to_message` adapts a frame to the sink's item type (a WebSocket binary
/// message, or the frame itself for the TCP codec).
pub async fn pump_outbound<S, M, F>(mut rx: mpsc::Receiver<Bytes>, mut sink: S, to_message: F)
where
    S: Sink<M> + Unpin,
    S::Error: Display,
    F: Fn(Bytes) -> M,
{
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.send(to_message(frame)).await {
            debug!("outbound write failed: {e}");
            break;
        }
    }
    let _ = sink.close().await;
}
