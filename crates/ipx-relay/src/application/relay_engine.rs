//! Routing of inbound frames.
//!
//! Every frame a client sends goes through [`RelayEngine::handle_frame`]:
//!
//! ```text
//! frame ──parse──┬─ registration request ──► reply to sender only
//!                ├─ broadcast destination  ──► every other client in scope
//!                └─ anything else          ──► client keyed by dest endpoint
//!                                              (silently dropped if absent)
//! ```
//!
//! Forwarded frames are never modified; only the registration reply is
//! generated by the relay.  The engine is transport-agnostic: the WebSocket
//! and TCP adapters call it with the sending client's handle, peer address and
//! room.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use ipx_core::{to_endpoint, AddressError, IpxHeader, ProtocolError, TransportAddress};
use thiserror::Error;
use tracing::{debug, trace};

use crate::application::registry::RoomRegistry;
use crate::application::watchdog::ActivityClock;
use crate::domain::{HandleError, SharedHandle};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("dropping frame: {0}")]
    MalformedFrame(#[from] ProtocolError),
    #[error("cannot translate peer address: {0}")]
    Translation(#[from] AddressError),
    #[error("failed to queue registration reply: {0}")]
    Reply(#[source] HandleError),
}

/// What happened to a routed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Registered,
    Broadcast { recipients: usize },
    Delivered,
    /// Unknown destination, or the destination's queue refused the frame.
    Dropped,
}

pub struct RelayEngine {
    registry: Arc<RoomRegistry>,
    clock: Arc<ActivityClock>,
    server_endpoint: SocketAddr,
}

impl RelayEngine {
    /// Creates an engine that reports `server_endpoint` as the relay's address.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::NotIpv4`] if `server_endpoint` cannot be
    /// written into an IPX header.
    pub fn new(
        registry: Arc<RoomRegistry>,
        clock: Arc<ActivityClock>,
        server_endpoint: SocketAddr,
    ) -> Result<Self, AddressError> {
        TransportAddress::from_socket_addr(server_endpoint)?;
        Ok(Self {
            registry,
            clock,
            server_endpoint,
        })
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn server_endpoint(&self) -> SocketAddr {
        self.server_endpoint
    }

    /// Routes one frame received from `sender` (connected from `peer`) in
    /// `room`.
    ///
    /// # Errors
    ///
    /// - [`RelayError::MalformedFrame`] if the frame is shorter than a header.
    /// - [`RelayError::Translation`] if `peer` has no IPv4 form.
    /// - [`RelayError::Reply`] if the sender's own queue refused the reply.
    ///
    /// None of these affect other clients.
    pub fn handle_frame(
        &self,
        sender: &SharedHandle,
        peer: SocketAddr,
        room: Option<&str>,
        frame: Bytes,
    ) -> Result<RouteOutcome, RelayError> {
        self.clock.touch();

        let header = IpxHeader::parse(&frame)?;

        if header.is_registration_request() {
            let reply = IpxHeader::registration_reply(peer, self.server_endpoint)?;
            sender
                .send(Bytes::copy_from_slice(&reply.encode()))
                .map_err(RelayError::Reply)?;
            debug!(%peer, room = room.unwrap_or("-"), "registration reply sent");
            return Ok(RouteOutcome::Registered);
        }

        if header.is_broadcast() {
            let recipients = self.registry.broadcast(room, sender, &frame);
            trace!(%peer, recipients, len = frame.len(), "broadcast");
            return Ok(RouteOutcome::Broadcast { recipients });
        }

        let dest = to_endpoint(&header.dest);
        let Some(target) = self.registry.lookup(room, &dest) else {
            trace!(%peer, %dest, "no such destination; dropped");
            return Ok(RouteOutcome::Dropped);
        };

        match target.send(frame) {
            Ok(()) => {
                trace!(%peer, %dest, "delivered");
                Ok(RouteOutcome::Delivered)
            }
            Err(e) => {
                debug!(%peer, %dest, "destination refused frame: {e}");
                Ok(RouteOutcome::Dropped)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ipx_core::protocol::codec::{BROADCAST_HOST, REGISTRATION_SOCKET};
    use ipx_core::{to_address, HEADER_SIZE};

    use super::*;
    use crate::application::registry::peer_key;
    use crate::domain::handle::recording::RecordingHandle;
    use crate::domain::handle::MockClientHandle;
    use crate::domain::same_handle;

    const SERVER: &str = "127.0.0.1:1900";

    struct Client {
        peer: SocketAddr,
        recorder: Arc<RecordingHandle>,
        handle: SharedHandle,
    }

    fn engine() -> RelayEngine {
        RelayEngine::new(
            Arc::new(RoomRegistry::new()),
            Arc::new(ActivityClock::new()),
            SERVER.parse().unwrap(),
        )
        .unwrap()
    }

    fn join(engine: &RelayEngine, room: Option<&str>, peer: &str) -> Client {
        let peer: SocketAddr = peer.parse().unwrap();
        let recorder = Arc::new(RecordingHandle::default());
        let handle: SharedHandle = recorder.clone();
        engine
            .registry()
            .connect(room, &peer_key(peer).unwrap(), Arc::clone(&handle));
        Client {
            peer,
            recorder,
            handle,
        }
    }

    fn frame_to(dest: TransportAddress, payload: &[u8]) -> Bytes {
        let header = IpxHeader {
            checksum: 0xFFFF,
            length: (HEADER_SIZE + payload.len()) as u16,
            dest,
            src: to_address("10.9.9.9:9999").unwrap(),
            ..IpxHeader::default()
        };
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(payload);
        Bytes::from(bytes)
    }

    fn registration_request() -> Bytes {
        let dest = TransportAddress {
            socket: REGISTRATION_SOCKET,
            ..TransportAddress::default()
        };
        frame_to(dest, &[])
    }

    fn broadcast_frame(payload: &[u8]) -> Bytes {
        let dest = TransportAddress {
            host: BROADCAST_HOST,
            port: 0xFFFF,
            socket: 0x4002,
            ..TransportAddress::default()
        };
        frame_to(dest, payload)
    }

    #[test]
    fn test_ipv6_server_endpoint_is_refused() {
        let result = RelayEngine::new(
            Arc::new(RoomRegistry::new()),
            Arc::new(ActivityClock::new()),
            "[::1]:1900".parse().unwrap(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_bootstrap_reply_names_client_and_server() {
        // Arrange
        let engine = engine();
        let a = join(&engine, None, "203.0.113.5:4000");

        // Act
        let outcome = engine
            .handle_frame(&a.handle, a.peer, None, registration_request())
            .unwrap();

        // Assert
        assert_eq!(outcome, RouteOutcome::Registered);
        let frames = a.recorder.frames();
        assert_eq!(frames.len(), 1);
        let reply = IpxHeader::parse(&frames[0]).unwrap();
        assert_eq!(reply.checksum, 0xFFFF);
        assert_eq!(reply.length, 30);
        assert_eq!(reply.transport_control, 0);
        assert_eq!(reply.packet_type, 0);
        assert_eq!(reply.dest.network, 0);
        assert_eq!(reply.dest.endpoint(), "203.0.113.5:4000");
        assert_eq!(reply.dest.socket, 0x2);
        assert_eq!(reply.src.network, 1);
        assert_eq!(reply.src.endpoint(), SERVER);
        assert_eq!(reply.src.socket, 0x2);
    }

    #[test]
    fn test_bootstrap_does_not_touch_registry() {
        let engine = engine();
        let a = join(&engine, Some("r"), "10.0.0.1:1");

        engine
            .handle_frame(&a.handle, a.peer, Some("r"), registration_request())
            .unwrap();

        assert_eq!(engine.registry().client_count(Some("r")), 1);
        assert_eq!(engine.registry().client_count(None), 0);
    }

    #[test]
    fn test_broadcast_reaches_b_and_c_once_each_not_a() {
        // Arrange
        let engine = engine();
        let a = join(&engine, Some("lan"), "10.0.0.1:5001");
        let b = join(&engine, Some("lan"), "10.0.0.2:5002");
        let c = join(&engine, Some("lan"), "10.0.0.3:5003");
        let frame = broadcast_frame(b"who is there");

        // Act
        let outcome = engine
            .handle_frame(&a.handle, a.peer, Some("lan"), frame.clone())
            .unwrap();

        // Assert
        assert_eq!(outcome, RouteOutcome::Broadcast { recipients: 2 });
        assert!(a.recorder.frames().is_empty());
        assert_eq!(b.recorder.frames(), vec![frame.clone()]);
        assert_eq!(c.recorder.frames(), vec![frame]);
    }

    #[test]
    fn test_unicast_is_delivered_unmodified() {
        let engine = engine();
        let a = join(&engine, None, "10.0.0.1:5001");
        let b = join(&engine, None, "10.0.0.2:5002");
        let mut dest = to_address("10.0.0.2:5002").unwrap();
        dest.network = 0x1234_5678;
        dest.socket = 0x4002;
        let frame = frame_to(dest, b"direct");

        let outcome = engine
            .handle_frame(&a.handle, a.peer, None, frame.clone())
            .unwrap();

        assert_eq!(outcome, RouteOutcome::Delivered);
        assert_eq!(b.recorder.frames(), vec![frame]);
        assert!(a.recorder.frames().is_empty());
    }

    #[test]
    fn test_unicast_to_unknown_destination_is_dropped_silently() {
        // Arrange
        let engine = engine();
        let a = join(&engine, None, "10.0.0.1:5001");
        let b = join(&engine, None, "10.0.0.2:5002");
        let frame = frame_to(to_address("10.0.0.99:1").unwrap(), b"lost");

        // Act
        let outcome = engine.handle_frame(&a.handle, a.peer, None, frame).unwrap();

        // Assert
        assert_eq!(outcome, RouteOutcome::Dropped);
        assert!(a.recorder.frames().is_empty(), "no error goes back to the sender");
        assert!(b.recorder.frames().is_empty());
    }

    #[test]
    fn test_unicast_does_not_cross_rooms() {
        let engine = engine();
        let a = join(&engine, Some("r1"), "10.0.0.1:5001");
        let b = join(&engine, Some("r2"), "10.0.0.2:5002");
        let frame = frame_to(to_address("10.0.0.2:5002").unwrap(), b"");

        let outcome = engine
            .handle_frame(&a.handle, a.peer, Some("r1"), frame)
            .unwrap();

        assert_eq!(outcome, RouteOutcome::Dropped);
        assert!(b.recorder.frames().is_empty());
    }

    #[test]
    fn test_short_frame_is_rejected_without_side_effects() {
        let engine = engine();
        let a = join(&engine, None, "10.0.0.1:5001");
        let b = join(&engine, None, "10.0.0.2:5002");

        let result = engine.handle_frame(&a.handle, a.peer, None, Bytes::from_static(&[0xFF; 29]));

        assert!(matches!(result, Err(RelayError::MalformedFrame(_))));
        assert!(a.recorder.frames().is_empty());
        assert!(b.recorder.frames().is_empty());
    }

    #[test]
    fn test_every_frame_counts_as_activity() {
        let clock = Arc::new(ActivityClock::new());
        let engine = RelayEngine::new(
            Arc::new(RoomRegistry::new()),
            Arc::clone(&clock),
            SERVER.parse().unwrap(),
        )
        .unwrap();
        let a = join(&engine, None, "10.0.0.1:5001");
        std::thread::sleep(std::time::Duration::from_millis(5));

        let _ = engine.handle_frame(&a.handle, a.peer, None, Bytes::from_static(b"short"));

        assert!(clock.last_activity_ms() > 0);
    }

    #[test]
    fn test_registration_reply_refused_by_full_queue() {
        let engine = engine();
        let mut mock = MockClientHandle::new();
        mock.expect_send().times(1).returning(|_| Err(HandleError::QueueFull));
        let sender: SharedHandle = Arc::new(mock);

        let result = engine.handle_frame(
            &sender,
            "10.0.0.1:5001".parse().unwrap(),
            None,
            registration_request(),
        );

        assert!(matches!(result, Err(RelayError::Reply(HandleError::QueueFull))));
    }

    #[test]
    fn test_ipv6_sender_cannot_register() {
        let engine = engine();
        let sender: SharedHandle = Arc::new(RecordingHandle::default());

        let result = engine.handle_frame(
            &sender,
            "[2001:db8::1]:4000".parse().unwrap(),
            None,
            registration_request(),
        );

        assert!(matches!(result, Err(RelayError::Translation(_))));
    }

    #[test]
    fn test_reconnect_routes_to_new_connection_and_closes_old() {
        // Arrange: B reconnects from the same endpoint.
        let engine = engine();
        let a = join(&engine, None, "10.0.0.1:5001");
        let old_b = join(&engine, None, "10.0.0.2:5002");
        let new_b = join(&engine, None, "10.0.0.2:5002");
        let frame = frame_to(to_address("10.0.0.2:5002").unwrap(), b"after");

        // Act
        engine
            .handle_frame(&a.handle, a.peer, None, frame.clone())
            .unwrap();

        // Assert
        assert!(old_b.recorder.is_closed());
        assert!(!new_b.recorder.is_closed());
        assert!(old_b.recorder.frames().is_empty());
        assert_eq!(new_b.recorder.frames(), vec![frame]);
        let current = engine.registry().lookup(None, "10.0.0.2:5002").unwrap();
        assert!(same_handle(&current, &new_b.handle));
    }
}
