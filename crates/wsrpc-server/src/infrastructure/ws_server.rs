//! WebSocket server: accept loop, per-connection task and the transport
//! adapter the bridge writes through.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Upgrading each accepted TCP connection to WebSocket, capturing the
//!    request URI and headers and negotiating a sub-protocol.
//! 3. Wrapping the write half in a [`WsTransport`] and announcing the
//!    connection to the [`SessionBridge`].
//! 4. Reading frames until the peer goes away, feeding text frames to the
//!    bridge and pinging the peer every `ping_interval`.
//! 5. Turning however the connection ended into one [`CloseStatus`] and
//!    reporting it to the bridge exactly once.
//!
//! # How a connection ends
//!
//! | What happened                          | Reported status                |
//! |----------------------------------------|--------------------------------|
//! | Close frame with code and reason       | that code and reason           |
//! | Close frame without payload            | 1005, empty reason             |
//! | Read error, or EOF without Close frame | 1006, error text as reason     |
//! | Nothing received within `ping_timeout` | 4500 `keep-alive timeout`      |
//!
//! Shutdown is triggered by a shared `AtomicBool` cleared from the Ctrl+C
//! handler in `main.rs`.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    WebSocketStream,
};
use tracing::{debug, error, info, trace, warn};
use wsrpc_core::{
    CloseStatus, Connection, ConnectionInfo, Transport, TransportError, TransportId,
};

use crate::application::{build_bridge, RequestHandler, SessionBridge};
use crate::domain::ServerConfig;

const SUBPROTOCOL_HEADER: &str = "sec-websocket-protocol";

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

// ── Transport adapter ─────────────────────────────────────────────────────────

/// Write half of one accepted WebSocket.
///
/// The read half stays with the connection task; only that task flips the
/// open flag on an inbound close, while a failed write flips it from here.
pub struct WsTransport {
    id: TransportId,
    info: ConnectionInfo,
    sink: Mutex<WsSink>,
    open: AtomicBool,
}

impl WsTransport {
    fn new(id: TransportId, info: ConnectionInfo, sink: WsSink) -> Self {
        Self {
            id,
            info,
            sink: Mutex::new(sink),
            open: AtomicBool::new(true),
        }
    }

    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Sends a WebSocket-level Ping.
    async fn send_ping(&self) -> Result<(), TransportError> {
        self.write(WsMessage::Ping(Vec::new())).await
    }

    async fn write(&self, frame: WsMessage) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed(self.id.clone()));
        }
        let mut sink = self.sink.lock().await;
        sink.send(frame).await.map_err(|e| {
            self.mark_closed();
            TransportError::Write {
                id: self.id.clone(),
                reason: e.to_string(),
            }
        })
    }

    /// Flushes whatever the protocol still owes the peer (the reply to a
    /// Close frame, typically) and closes the sink.
    async fn finish(&self) {
        self.mark_closed();
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            trace!("transport {}: close after disconnect: {e}", self.id);
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn id(&self) -> &TransportId {
        &self.id
    }

    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.write(WsMessage::Text(text.to_string())).await
    }

    async fn close(&self, status: &CloseStatus) -> Result<(), TransportError> {
        if !self.is_open() {
            return Ok(());
        }
        let frame = CloseFrame {
            code: CloseCode::from(status.code),
            reason: status.reason.clone().into(),
        };
        let result = self.write(WsMessage::Close(Some(frame))).await;
        self.mark_closed();
        result
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `config.ws_bind_addr` and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound.
pub async fn run_server(
    config: ServerConfig,
    handler: Arc<dyn RequestHandler>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.ws_bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {}", config.ws_bind_addr))?;

    info!("JSON-RPC WebSocket server listening on {}", config.ws_bind_addr);

    let bridge = build_bridge(&config, handler);
    serve(listener, Arc::new(config), bridge, running).await
}

/// Accept loop over an already-bound listener.
///
/// Each accepted connection runs in its own task, so one slow client never
/// blocks the others.
///
/// # Errors
///
/// Currently never fails; accept errors are logged and the loop continues.
pub async fn serve(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    bridge: Arc<SessionBridge>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // Short accept timeout so the loop notices the shutdown flag.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("TCP connection from {peer_addr}");
                let config = Arc::clone(&config);
                let bridge = Arc::clone(&bridge);
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, config, bridge).await;
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }

    Ok(())
}

// ── Per-connection task ───────────────────────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<ServerConfig>,
    bridge: Arc<SessionBridge>,
) {
    if let Err(e) = run_connection(stream, peer_addr, config, bridge).await {
        warn!("connection {peer_addr} ended with error: {e:#}");
    }
}

/// Handshake metadata collected inside the tungstenite callback.
#[derive(Default)]
struct HandshakeCapture {
    uri: Option<String>,
    headers: Vec<(String, String)>,
    accepted_protocol: Option<String>,
}

/// Handshake, then the read loop, then exactly one `on_close`.
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails; no bridge callback has
/// run in that case.
async fn run_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<ServerConfig>,
    bridge: Arc<SessionBridge>,
) -> anyhow::Result<()> {
    let mut capture = HandshakeCapture::default();
    let supported = config.subprotocols.clone();

    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        capture.uri = Some(request.uri().to_string());
        capture.headers = request
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let offered = request
            .headers()
            .get(SUBPROTOCOL_HEADER)
            .and_then(|v| v.to_str().ok());
        if let Some(protocol) = negotiate_subprotocol(offered, &supported) {
            if let Ok(value) = HeaderValue::from_str(&protocol) {
                response.headers_mut().insert(SUBPROTOCOL_HEADER, value);
                capture.accepted_protocol = Some(protocol);
            }
        }
        Ok(response)
    };

    let ws_stream = accept_hdr_async(stream, callback)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let info = ConnectionInfo {
        remote_addr: Some(peer_addr),
        uri: capture.uri,
        accepted_protocol: capture.accepted_protocol,
        headers: capture.headers,
    };

    let (sink, mut source) = ws_stream.split();
    let transport = Arc::new(WsTransport::new(TransportId::random(), info, sink));
    let connection = Connection::new(transport.clone());

    bridge.on_connect(&connection).await;

    let mut ticker = interval(config.ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // first tick is immediate
    let mut last_seen = Instant::now();

    let status = loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(message)) => {
                    last_seen = Instant::now();
                    match message {
                        WsMessage::Text(text) => bridge.on_message(&connection, &text).await,
                        WsMessage::Binary(data) => warn!(
                            "transport {}: unexpected binary frame ({} bytes, ignored)",
                            connection.id(),
                            data.len()
                        ),
                        WsMessage::Ping(_) | WsMessage::Pong(_) => {
                            trace!("transport {}: ping/pong", connection.id());
                        }
                        WsMessage::Close(frame) => break close_status_from_frame(frame),
                        WsMessage::Frame(_) => {}
                    }
                }
                Some(Err(WsError::ConnectionClosed)) => break CloseStatus::no_status(),
                Some(Err(e)) => {
                    let transport_error = TransportError::Other(e.to_string());
                    bridge.on_transport_error(&connection, &transport_error).await;
                    break CloseStatus::abnormal(e.to_string());
                }
                None => break CloseStatus::abnormal("stream ended without a close frame"),
            },
            _ = ticker.tick() => {
                if last_seen.elapsed() >= config.ping_timeout {
                    let status = CloseStatus::keepalive_timeout();
                    if let Err(e) = connection.close(&status).await {
                        debug!("transport {}: keep-alive close failed: {e}", connection.id());
                    }
                    break status;
                }
                if let Err(e) = transport.send_ping().await {
                    debug!("transport {}: keep-alive ping failed: {e}", connection.id());
                }
            }
        }
    };

    transport.finish().await;
    bridge.on_close(&connection, &status).await;
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Picks the first sub-protocol the client offered that the server supports.
///
/// `offered` is the raw `Sec-WebSocket-Protocol` header value
/// (comma-separated).  Returns `None` when the client offered nothing or
/// nothing matches.
pub fn negotiate_subprotocol(offered: Option<&str>, supported: &[String]) -> Option<String> {
    offered?
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .find(|p| supported.iter().any(|s| s == p))
        .map(str::to_string)
}

/// Close status for an inbound Close frame.
pub fn close_status_from_frame(frame: Option<CloseFrame<'_>>) -> CloseStatus {
    match frame {
        Some(frame) => CloseStatus::new(u16::from(frame.code), frame.reason.to_string()),
        None => CloseStatus::no_status(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wsrpc_core::CloseCategory;

    fn supported() -> Vec<String> {
        vec!["jsonrpc".to_string(), "jsonrpc-v2".to_string()]
    }

    #[test]
    fn test_negotiate_picks_first_offered_match() {
        let chosen = negotiate_subprotocol(Some("chat, jsonrpc-v2, jsonrpc"), &supported());
        assert_eq!(chosen.as_deref(), Some("jsonrpc-v2"));
    }

    #[test]
    fn test_negotiate_without_offer_is_none() {
        assert_eq!(negotiate_subprotocol(None, &supported()), None);
    }

    #[test]
    fn test_negotiate_without_match_is_none() {
        assert_eq!(negotiate_subprotocol(Some("chat, mqtt"), &supported()), None);
    }

    #[test]
    fn test_negotiate_with_nothing_supported_is_none() {
        assert_eq!(negotiate_subprotocol(Some("jsonrpc"), &[]), None);
    }

    #[test]
    fn test_close_frame_keeps_code_and_reason() {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "tab closed".into(),
        };

        let status = close_status_from_frame(Some(frame));

        assert_eq!(status.code, 1001);
        assert_eq!(status.reason, "tab closed");
        assert_eq!(status.category(), CloseCategory::GoingAway);
    }

    #[test]
    fn test_close_frame_without_payload_is_no_status() {
        let status = close_status_from_frame(None);
        assert_eq!(status.code, 1005);
        assert_eq!(status.category(), CloseCategory::NoStatusCode);
    }

    #[test]
    fn test_application_close_code_is_preserved() {
        let frame = CloseFrame {
            code: CloseCode::from(4001),
            reason: "".into(),
        };
        let status = close_status_from_frame(Some(frame));
        assert_eq!(status.code, 4001);
        assert_eq!(status.category(), CloseCategory::Unclassified);
    }
}
