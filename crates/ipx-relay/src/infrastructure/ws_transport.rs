//! WebSocket transport.
//!
//! Clients connect to `ws://<relay>/ipx/<room>`.  During the HTTP upgrade the
//! relay:
//!
//! 1. takes the room from the path, refusing anything else with 404;
//! 2. checks the `Host` header against the allowlist (if configured),
//!    refusing strangers with 403;
//! 3. echoes the `binary` subprotocol when the client offers it.
//!
//! After the upgrade every data message, binary or text, is exactly one IPX
//! frame.  Ping/pong and close are handled by tungstenite.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{HOST, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::application::RelayEngine;
use crate::domain::RelayConfig;
use crate::infrastructure::session::{pump_outbound, Session};

/// The only subprotocol the relay speaks.
pub const SUBPROTOCOL: &str = "binary";

/// Extracts the room from a `/ipx/<room>[/...]` path.
pub fn room_from_path(path: &str) -> Option<&str> {
    let mut parts = path.split('/').skip(1);
    match (parts.next(), parts.next()) {
        (Some("ipx"), Some(room)) if !room.is_empty() => Some(room),
        _ => None,
    }
}

/// True when `host` may connect under `allowed` (empty allows everyone).
pub fn host_allowed(host: Option<&str>, allowed: &[String]) -> bool {
    allowed.is_empty() || host.is_some_and(|host| allowed.iter().any(|a| a == host))
}

fn offers_binary(request: &Request) -> bool {
    request
        .headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|protocol| protocol.trim() == SUBPROTOCOL)
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Decides whether to upgrade `request`; on success returns the room and the
/// response to send.
pub fn check_upgrade(
    request: &Request,
    mut response: Response,
    allowed_hosts: &[String],
) -> Result<(String, Response), ErrorResponse> {
    let Some(room) = room_from_path(request.uri().path()) else {
        return Err(reject(StatusCode::NOT_FOUND, "expected /ipx/<room>"));
    };

    let host = request.headers().get(HOST).and_then(|v| v.to_str().ok());
    if !host_allowed(host, allowed_hosts) {
        return Err(reject(StatusCode::FORBIDDEN, "host not allowed"));
    }

    if offers_binary(request) {
        response
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
    }
    Ok((room.to_string(), response))
}

/// Runs one WebSocket client from handshake to disconnect.
///
/// # Errors
///
/// Returns an error if the handshake is refused or fails, or if the peer
/// cannot be registered.  Errors after registration end the session quietly.
pub async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    engine: Arc<RelayEngine>,
    config: Arc<RelayConfig>,
) -> anyhow::Result<()> {
    let mut room = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let (accepted, response) = check_upgrade(request, response, &config.allowed_hosts)?;
        room = Some(accepted);
        Ok(response)
    };

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_frame_len);
    ws_config.max_frame_size = Some(config.max_frame_len);

    let ws = accept_hdr_async_with_config(stream, callback, Some(ws_config))
        .await
        .with_context(|| format!("WebSocket handshake with {peer} failed"))?;
    let room = room.context("handshake completed without a room")?;

    let (session, rx) = Session::open(engine, peer, Some(room), config.outbound_queue)
        .with_context(|| format!("cannot register {peer}"))?;

    let (sink, mut inbound) = ws.split();
    let writer = tokio::spawn(pump_outbound(rx, sink, |frame: Bytes| {
        Message::Binary(frame.to_vec())
    }));

    loop {
        tokio::select! {
            _ = session.handle().closed() => {
                debug!(id = %session.handle().id(), "connection replaced; closing");
                break;
            }
            message = inbound.next() => match message {
                Some(Ok(Message::Binary(data))) => session.route(Bytes::from(data)),
                Some(Ok(Message::Text(text))) => session.route(Bytes::from(text.into_bytes())),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(other)) => trace!("ignoring control message ({} bytes)", other.len()),
                Some(Err(e)) => {
                    warn!(%peer, "WebSocket read error: {e}");
                    break;
                }
            },
        }
    }

    drop(session);
    writer.abort();
    Ok(())
}
