//! The session bridge: transport lifecycle events in, session effects out.
//!
//! The WebSocket layer calls one of four callbacks for every event on a
//! connection.  The bridge turns them into calls on the protocol engine and
//! the session registry:
//!
//! ```text
//! on_connect ─────────► log handshake metadata (no session yet)
//! on_message ─────────► engine.process_message(raw, factory, sender, id)
//! on_transport_error ─► engine.process_transport_error(id, error)
//! on_close ───────────► registry lookup ─┬─ none ──────────► log
//!                                         ├─ graceful ──────► log
//!                                         └─ not graceful ──► registry.close_session_if_timeout
//! ```
//!
//! # Fault boundaries
//!
//! Every callback runs inside [`isolate`]: an error returned by a
//! collaborator *and* a panic inside one are caught, logged, and swallowed.
//! Nothing escapes to the transport task, so one bad message never takes
//! down its connection.
//!
//! # Adapters handed to the engine
//!
//! For each inbound message the bridge builds a [`ConnectionSessionFactory`]
//! and a [`ConnectionResponseSender`], both capturing the connection the
//! message arrived on.  The engine can create or rebind sessions and send
//! replies without ever seeing the transport.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info, trace};
use wsrpc_core::{
    CloseStatus, Connection, DeliveryError, EngineError, Message, ProtocolEngine, ResponseSender,
    SendOutcome, ServerSession, ServerSessionFactory, SessionId, SessionRegistry, TransportError,
};

// ── Fault boundary ────────────────────────────────────────────────────────────

/// What a callback boundary caught.
#[derive(Debug)]
pub enum Fault {
    Error(String),
    Panic(String),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Error(e) => write!(f, "{e}"),
            Fault::Panic(p) => write!(f, "panicked: {p}"),
        }
    }
}

/// Runs `fut` and converts both `Err` and panics into a [`Fault`].
pub async fn isolate<F, E>(fut: F) -> Result<(), Fault>
where
    F: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Fault::Error(e.to_string())),
        Err(payload) => Err(Fault::Panic(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ── Session factory ───────────────────────────────────────────────────────────

/// Creates and rebinds sessions on one specific connection.
pub struct ConnectionSessionFactory {
    connection: Arc<Connection>,
}

impl ConnectionSessionFactory {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ServerSessionFactory for ConnectionSessionFactory {
    fn create_session(
        &self,
        session_id: SessionId,
        register_info: Option<Value>,
        registry: &Arc<dyn SessionRegistry>,
    ) -> Arc<ServerSession> {
        Arc::new(ServerSession::new(
            session_id,
            register_info,
            Arc::clone(&self.connection),
            registry,
        ))
    }

    async fn update_session_on_reconnection(&self, session: &ServerSession) {
        session.rebind(Arc::clone(&self.connection)).await;
    }
}

// ── Response sender ───────────────────────────────────────────────────────────

/// Writes engine output to one specific connection.
pub struct ConnectionResponseSender {
    connection: Arc<Connection>,
    label: Arc<str>,
}

impl ConnectionResponseSender {
    pub fn new(connection: Arc<Connection>, label: Arc<str>) -> Self {
        Self { connection, label }
    }

    /// Serialised write: the connection's lock is held for the open check and
    /// the whole frame.  Dropped frames are reported, never retried.
    async fn send_json(&self, json: &str) -> Result<SendOutcome, DeliveryError> {
        let outcome = self.connection.send_text(json).await?;
        match outcome {
            SendOutcome::Delivered => {}
            SendOutcome::Closed => error!(
                "{}Trying to send a message to closed transport {}",
                self.label,
                self.connection.id()
            ),
            SendOutcome::Retired => error!(
                "{}Trying to send a message to transport {} after its session moved to a \
                 new connection",
                self.label,
                self.connection.id()
            ),
        }
        Ok(outcome)
    }
}

#[async_trait]
impl ResponseSender for ConnectionResponseSender {
    async fn send_response(&self, message: &Message) -> Result<SendOutcome, DeliveryError> {
        let json = message.to_json()?;
        debug!("{}Res<- {}", self.label, json);
        self.send_json(&json).await
    }

    async fn send_ping_response(&self, message: &Message) -> Result<SendOutcome, DeliveryError> {
        let json = message.to_json()?;
        trace!("{}Res<- {}", self.label, json);
        self.send_json(&json).await
    }
}

// ── Bridge ────────────────────────────────────────────────────────────────────

/// Lifecycle handler binding transport connections to logical sessions.
pub struct SessionBridge {
    engine: Arc<dyn ProtocolEngine>,
    registry: Arc<dyn SessionRegistry>,
    label: Arc<str>,
}

impl SessionBridge {
    pub fn new(engine: Arc<dyn ProtocolEngine>, registry: Arc<dyn SessionRegistry>) -> Self {
        Self {
            engine,
            registry,
            label: Arc::from(""),
        }
    }

    /// Prefixes every log line with `[label] `.
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = if label.is_empty() {
            Arc::from("")
        } else {
            Arc::from(format!("[{label}] "))
        };
        self
    }

    /// A connection finished its handshake.  Logs only; the session is
    /// created lazily by the first message.
    pub async fn on_connect(&self, connection: &Arc<Connection>) {
        let info = connection.info();
        info!(
            "{}Client connection established: transport={} remote={} uri={} protocol={} \
             headers={:?}",
            self.label,
            connection.id(),
            info.remote_addr
                .map(|a| a.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            info.uri.as_deref().unwrap_or("-"),
            info.accepted_protocol.as_deref().unwrap_or("-"),
            info.headers,
        );
    }

    /// One inbound text frame.
    pub async fn on_message(&self, connection: &Arc<Connection>, raw: &str) {
        let factory: Arc<dyn ServerSessionFactory> =
            Arc::new(ConnectionSessionFactory::new(Arc::clone(connection)));
        let sender: Arc<dyn ResponseSender> = Arc::new(ConnectionResponseSender::new(
            Arc::clone(connection),
            Arc::clone(&self.label),
        ));

        let processing = self
            .engine
            .process_message(raw, factory, sender, connection.id());

        if let Err(fault) = isolate(processing).await {
            error!(
                "{}Exception processing request {} on transport {}: {}",
                self.label,
                raw,
                connection.id(),
                fault
            );
        }
    }

    /// The transport reported a non-fatal error.
    pub async fn on_transport_error(
        &self,
        connection: &Arc<Connection>,
        transport_error: &TransportError,
    ) {
        let forwarding = self
            .engine
            .process_transport_error(connection.id(), transport_error);

        if let Err(fault) = isolate(forwarding).await {
            error!(
                "{}Exception processing transport error '{}' on transport {}: {}",
                self.label,
                transport_error,
                connection.id(),
                fault
            );
        }
    }

    /// The connection is gone.
    pub async fn on_close(&self, connection: &Arc<Connection>, status: &CloseStatus) {
        if let Err(fault) = isolate(self.handle_close(connection, status)).await {
            error!(
                "{}Exception processing close of transport {}: {}",
                self.label,
                connection.id(),
                fault
            );
        }
    }

    async fn handle_close(
        &self,
        connection: &Arc<Connection>,
        status: &CloseStatus,
    ) -> Result<(), EngineError> {
        let transport_id = connection.id();

        let Some(session) = self.registry.session_by_transport_id(transport_id).await else {
            info!(
                "{}Transport {} not associated with any session closed for {}",
                self.label, transport_id, status
            );
            return Ok(());
        };

        if session.is_gracefully_closed() {
            info!(
                "{}Session {} with transport {} closed gracefully",
                self.label,
                session.session_id(),
                transport_id
            );
            return Ok(());
        }

        info!(
            "{}Session {} with transport {} closed for {}",
            self.label,
            session.session_id(),
            transport_id,
            status
        );
        self.registry
            .close_session_if_timeout(transport_id, &status.reason)
            .await;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
