//! Application hook for JSON-RPC methods the engine does not handle itself.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use wsrpc_core::{Request, ResponseError, ServerSession, TransportError};

/// Receives every application request plus session lifecycle notifications.
///
/// Only [`handle_request`](Self::handle_request) is mandatory.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Produces the `result` (or `error`) for one request.
    async fn handle_request(
        &self,
        session: &Arc<ServerSession>,
        request: &Request,
    ) -> Result<Value, ResponseError>;

    /// A new logical session was created.
    async fn after_connection_established(&self, _session: &Arc<ServerSession>) {}

    /// A session ended: gracefully (`closeSession`) or after its reconnection
    /// window expired.
    async fn after_connection_closed(&self, _session: &Arc<ServerSession>, _reason: &str) {}

    async fn handle_transport_error(
        &self,
        _session: &Arc<ServerSession>,
        _error: &TransportError,
    ) {
    }
}

/// Answers `echo` with its params; every other method is unknown.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn handle_request(
        &self,
        _session: &Arc<ServerSession>,
        request: &Request,
    ) -> Result<Value, ResponseError> {
        match request.method.as_str() {
            "echo" => Ok(request.params.clone().unwrap_or(Value::Null)),
            other => Err(ResponseError::method_not_found(other)),
        }
    }
}
