//! Collaborator seams.
//!
//! The bridge talks to three collaborators it does not own, and hands one
//! pair of adapters to the protocol engine:
//!
//! | Trait                    | Implemented by          | Called by           |
//! |--------------------------|-------------------------|---------------------|
//! | [`SessionRegistry`]      | the sessions manager    | bridge, sessions    |
//! | [`ProtocolEngine`]       | the JSON-RPC engine     | bridge              |
//! | [`ServerSessionFactory`] | the bridge (per message)| engine              |
//! | [`ResponseSender`]       | the bridge (per message)| engine              |
//!
//! Keeping these as traits means the engine never sees a socket and the
//! bridge never parses JSON-RPC.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::connection::{SendOutcome, TransportError};
use crate::domain::ids::{SessionId, TransportId};
use crate::domain::session::{DeliveryError, ServerSession};
use crate::protocol::message::{Message, MessageError};

/// Errors a protocol engine may return from one call.
///
/// The bridge never propagates these; it logs them with the payload that
/// caused them and carries on.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("processing failed: {0}")]
    Processing(String),
}

/// Maps logical sessions to transport connections and owns eviction.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// The session currently bound to `transport_id`, if any.
    async fn session_by_transport_id(&self, transport_id: &TransportId)
        -> Option<Arc<ServerSession>>;

    /// Told when a connection closed without a graceful session close.
    ///
    /// The registry decides whether to wait for a reconnection or to evict.
    /// `reason` is the raw close reason reported by the transport.
    async fn close_session_if_timeout(&self, transport_id: &TransportId, reason: &str);

    /// Forgets a session (graceful close).
    async fn remove_session(&self, session_id: &SessionId);
}

/// Lets the engine create or move sessions without seeing the transport.
///
/// Every instance is scoped to the connection that delivered the message
/// being processed.
#[async_trait]
pub trait ServerSessionFactory: Send + Sync {
    /// Builds a new session bound to the current connection.
    fn create_session(
        &self,
        session_id: SessionId,
        register_info: Option<Value>,
        registry: &Arc<dyn SessionRegistry>,
    ) -> Arc<ServerSession>;

    /// Rebinds an existing session to the current connection.
    async fn update_session_on_reconnection(&self, session: &ServerSession);
}

/// Outbound delivery for the engine.
///
/// May be called any number of times, during and after the `process_message`
/// call it was handed to.
#[async_trait]
pub trait ResponseSender: Send + Sync {
    async fn send_response(&self, message: &Message) -> Result<SendOutcome, DeliveryError>;

    /// Same delivery as [`send_response`](Self::send_response), quieter logs.
    async fn send_ping_response(&self, message: &Message) -> Result<SendOutcome, DeliveryError>;
}

/// Parses and dispatches inbound frames.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    async fn process_message(
        &self,
        raw: &str,
        factory: Arc<dyn ServerSessionFactory>,
        sender: Arc<dyn ResponseSender>,
        transport_id: &TransportId,
    ) -> Result<(), EngineError>;

    async fn process_transport_error(
        &self,
        transport_id: &TransportId,
        error: &TransportError,
    ) -> Result<(), EngineError>;
}
