//! JSON-RPC 2.0 protocol engine.
//!
//! Parses each inbound frame, answers the built-in methods itself and hands
//! everything else to the application's [`RequestHandler`]:
//!
//! | Method         | Behaviour                                                   |
//! |----------------|-------------------------------------------------------------|
//! | `ping`         | `{"value":"pong"}` via the quiet ping path                  |
//! | `connect`      | new session, or resume the one named by `sessionId`         |
//! | `closeSession` | graceful close: forget the session, reply `{"value":"bye"}` |
//! | anything else  | resolve (or lazily create) the session, ask the handler     |
//!
//! Responses sent by the client are logged and ignored.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, trace, warn};
use wsrpc_core::{
    EngineError, Message, MessageError, ProtocolEngine, Request, Response, ResponseError,
    ResponseSender, ServerSession, ServerSessionFactory, SessionId, SessionRegistry,
    TransportError, TransportId,
};

use super::handler::RequestHandler;
use super::sessions::SessionsManager;

pub const METHOD_PING: &str = "ping";
pub const METHOD_CONNECT: &str = "connect";
pub const METHOD_CLOSE_SESSION: &str = "closeSession";

/// Reason passed to `after_connection_closed` for a client-requested close.
pub const CLOSE_SESSION_REASON: &str = "closeSession";

/// How the session for a request was found.
enum Resolved {
    Session(Arc<ServerSession>),
    Unknown(String),
}

pub struct JsonRpcProtocolManager {
    sessions: Arc<SessionsManager>,
    handler: Arc<dyn RequestHandler>,
    label: String,
}

impl JsonRpcProtocolManager {
    pub fn new(sessions: Arc<SessionsManager>, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            sessions,
            handler,
            label: String::new(),
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = if label.is_empty() {
            String::new()
        } else {
            format!("[{label}] ")
        };
        self
    }

    // ── Built-in methods ──────────────────────────────────────────────────────

    /// Keep-alive: always answered, with a `null` id when the client sent none.
    async fn handle_ping(
        &self,
        request: &Request,
        sender: &Arc<dyn ResponseSender>,
    ) -> Result<(), EngineError> {
        let pong = Response::success(request.id.clone(), json!({ "value": "pong" }));
        sender.send_ping_response(&pong.into()).await?;
        Ok(())
    }

    async fn handle_connect(
        &self,
        request: &Request,
        factory: &Arc<dyn ServerSessionFactory>,
        sender: &Arc<dyn ResponseSender>,
        transport_id: &TransportId,
    ) -> Result<(), EngineError> {
        let session = match request.session_id() {
            Some(requested) => match self.sessions.get(&SessionId::new(requested)).await {
                Some(session) => {
                    self.follow_transport(&session, factory, transport_id).await;
                    session
                }
                None => {
                    warn!(
                        "{}Client on transport {} asked for unknown session {}",
                        self.label, transport_id, requested
                    );
                    let error = ResponseError::invalid_session(requested);
                    return self.reply(sender, request, Err(error), None).await;
                }
            },
            None => match self.sessions.session_by_transport_id(transport_id).await {
                Some(existing) => existing,
                None => self.create_session(request, factory).await,
            },
        };

        let session_id = session.session_id().clone();
        self.reply(sender, request, Ok(Value::Object(Map::new())), Some(&session_id))
            .await
    }

    async fn handle_close_session(
        &self,
        request: &Request,
        sender: &Arc<dyn ResponseSender>,
        transport_id: &TransportId,
    ) -> Result<(), EngineError> {
        let session = match request.session_id() {
            Some(requested) => self.sessions.get(&SessionId::new(requested)).await,
            None => self.sessions.session_by_transport_id(transport_id).await,
        };

        let Some(session) = session else {
            debug!(
                "{}closeSession on transport {} without a session",
                self.label, transport_id
            );
            return self
                .reply(sender, request, Ok(json!({ "value": "bye" })), None)
                .await;
        };

        session.set_gracefully_closed();
        self.sessions.remove_session(session.session_id()).await;
        let session_id = session.session_id().clone();
        let replied = self
            .reply(sender, request, Ok(json!({ "value": "bye" })), Some(&session_id))
            .await;
        self.handler
            .after_connection_closed(&session, CLOSE_SESSION_REASON)
            .await;
        replied
    }

    // ── Application requests ──────────────────────────────────────────────────

    async fn handle_app_request(
        &self,
        request: &Request,
        factory: &Arc<dyn ServerSessionFactory>,
        sender: &Arc<dyn ResponseSender>,
        transport_id: &TransportId,
    ) -> Result<(), EngineError> {
        let session = match self.resolve_session(request, factory, transport_id).await {
            Resolved::Session(session) => session,
            Resolved::Unknown(requested) => {
                let error = ResponseError::invalid_session(&requested);
                return self.reply(sender, request, Err(error), None).await;
            }
        };

        let outcome = self.handler.handle_request(&session, request).await;
        let session_id = session.session_id().clone();
        self.reply(sender, request, outcome, Some(&session_id)).await
    }

    async fn resolve_session(
        &self,
        request: &Request,
        factory: &Arc<dyn ServerSessionFactory>,
        transport_id: &TransportId,
    ) -> Resolved {
        if let Some(requested) = request.session_id() {
            return match self.sessions.get(&SessionId::new(requested)).await {
                Some(session) => {
                    self.follow_transport(&session, factory, transport_id).await;
                    Resolved::Session(session)
                }
                None => Resolved::Unknown(requested.to_string()),
            };
        }
        match self.sessions.session_by_transport_id(transport_id).await {
            Some(session) => Resolved::Session(session),
            None => Resolved::Session(self.create_session(request, factory).await),
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    async fn create_session(
        &self,
        request: &Request,
        factory: &Arc<dyn ServerSessionFactory>,
    ) -> Arc<ServerSession> {
        let registry: Arc<dyn SessionRegistry> = self.sessions.clone();
        let session =
            factory.create_session(SessionId::random(), request.params.clone(), &registry);
        self.sessions.register(Arc::clone(&session)).await;
        debug!(
            "{}Created session {} on transport {}",
            self.label,
            session.session_id(),
            session.transport_id()
        );
        self.handler.after_connection_established(&session).await;
        session
    }

    /// Moves `session` onto `transport_id` if it currently lives elsewhere.
    async fn follow_transport(
        &self,
        session: &Arc<ServerSession>,
        factory: &Arc<dyn ServerSessionFactory>,
        transport_id: &TransportId,
    ) {
        let previous = session.transport_id();
        if previous == *transport_id {
            return;
        }
        factory.update_session_on_reconnection(session).await;
        self.sessions.rebind_transport(session, &previous).await;
        debug!(
            "{}Session {} resumed on transport {} (was {})",
            self.label,
            session.session_id(),
            transport_id,
            previous
        );
    }

    /// Sends the response for `request`; notifications get none.
    async fn reply(
        &self,
        sender: &Arc<dyn ResponseSender>,
        request: &Request,
        outcome: Result<Value, ResponseError>,
        session_id: Option<&SessionId>,
    ) -> Result<(), EngineError> {
        if request.is_notification() {
            return Ok(());
        }
        let response = match outcome {
            Ok(result) => {
                let response = Response::success(request.id.clone(), result);
                match session_id {
                    Some(id) => response.with_session_id(id.as_str()),
                    None => response,
                }
            }
            Err(error) => Response::error(request.id.clone(), error),
        };
        sender.send_response(&response.into()).await?;
        Ok(())
    }
}

#[async_trait]
impl ProtocolEngine for JsonRpcProtocolManager {
    async fn process_message(
        &self,
        raw: &str,
        factory: Arc<dyn ServerSessionFactory>,
        sender: Arc<dyn ResponseSender>,
        transport_id: &TransportId,
    ) -> Result<(), EngineError> {
        let message = match Message::from_json(raw) {
            Ok(message) => message,
            Err(e) => {
                let error = match &e {
                    MessageError::Parse(cause) => ResponseError::parse_error(cause.to_string()),
                    other => ResponseError::invalid_request(other.to_string()),
                };
                sender.send_response(&Response::error(None, error).into()).await?;
                return Err(e.into());
            }
        };

        let request = match message {
            Message::Request(request) => request,
            Message::Response(response) => {
                debug!(
                    "{}Ignoring response id={} from transport {}",
                    self.label, response.id, transport_id
                );
                return Ok(());
            }
        };

        match request.method.as_str() {
            METHOD_PING => {
                trace!("{}Req-> {}", self.label, raw);
                self.handle_ping(&request, &sender).await
            }
            METHOD_CONNECT => {
                debug!("{}Req-> {}", self.label, raw);
                self.handle_connect(&request, &factory, &sender, transport_id).await
            }
            METHOD_CLOSE_SESSION => {
                debug!("{}Req-> {}", self.label, raw);
                self.handle_close_session(&request, &sender, transport_id).await
            }
            _ => {
                debug!("{}Req-> {}", self.label, raw);
                self.handle_app_request(&request, &factory, &sender, transport_id)
                    .await
            }
        }
    }

    async fn process_transport_error(
        &self,
        transport_id: &TransportId,
        error: &TransportError,
    ) -> Result<(), EngineError> {
        match self.sessions.session_by_transport_id(transport_id).await {
            Some(session) => self.handler.handle_transport_error(&session, error).await,
            None => warn!(
                "{}Transport error on {} with no session: {}",
                self.label, transport_id, error
            ),
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
