//! JSON-RPC 2.0 message model.
//!
//! Every WebSocket text frame carries exactly one of these messages.  The
//! bridge itself treats them as opaque JSON text; only the protocol engine
//! looks inside.
//!
//! # Logical session id on the wire
//!
//! A client that wants to resume a conversation after reconnecting sends the
//! session id it was given inside the request params, and the server echoes
//! it back inside the result object:
//!
//! ```json
//! {"jsonrpc":"2.0","id":1,"method":"connect","params":{"sessionId":"4f0c…"}}
//! {"jsonrpc":"2.0","id":1,"result":{"sessionId":"4f0c…"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Value of the mandatory `jsonrpc` member.
pub const JSONRPC_VERSION: &str = "2.0";

/// Name of the member carrying the logical session id.
pub const SESSION_ID_PROPERTY: &str = "sessionId";

/// Errors raised while decoding or encoding a message.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The text is not valid JSON.
    #[error("malformed JSON: {0}")]
    Parse(#[source] serde_json::Error),

    /// Valid JSON, but not a JSON-RPC request or response.
    #[error("invalid JSON-RPC message: {0}")]
    Invalid(String),

    /// The message could not be serialised (non-string map keys and the like).
    #[error("failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Standard JSON-RPC error codes plus the session-specific ones.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// A `connect` named a session the server does not know (expired or bogus).
    pub const INVALID_SESSION: i64 = 40007;
}

// ── Request ───────────────────────────────────────────────────────────────────

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// A request or, when `id` is absent, a notification.
///
/// A missing `jsonrpc` member is read as `"2.0"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Builds a request that expects a response.
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Builds a notification (no `id`, no response expected).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// The `sessionId` the client put in `params`, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.params
            .as_ref()
            .and_then(|p| p.get(SESSION_ID_PROPERTY))
            .and_then(Value::as_str)
    }
}

// ── Response ──────────────────────────────────────────────────────────────────

/// Error object of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(error_codes::PARSE_ERROR, "Parse error").with_data(Value::String(detail.into()))
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_REQUEST, "Invalid request")
            .with_data(Value::String(detail.into()))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        )
    }

    pub fn invalid_session(session_id: &str) -> Self {
        Self::new(
            error_codes::INVALID_SESSION,
            format!("Invalid session: {session_id}"),
        )
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A response to a request.  Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    /// `null` when the request id could not be determined (parse errors).
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, error: ResponseError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(error),
        }
    }

    /// Stamps the logical session id into the result.
    ///
    /// Object results gain a `sessionId` member; any other result is wrapped
    /// as `{"value": <result>, "sessionId": …}`.  Error responses are left as
    /// they are.
    pub fn with_session_id(mut self, session_id: &str) -> Self {
        if let Some(result) = self.result.take() {
            let mut object = match result {
                Value::Object(map) => map,
                other => {
                    let mut map = Map::new();
                    map.insert("value".to_string(), other);
                    map
                }
            };
            object.insert(
                SESSION_ID_PROPERTY.to_string(),
                Value::String(session_id.to_string()),
            );
            self.result = Some(Value::Object(object));
        }
        self
    }

    /// The `sessionId` stamped into the result, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|r| r.get(SESSION_ID_PROPERTY))
            .and_then(Value::as_str)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ── Message ───────────────────────────────────────────────────────────────────

/// Any JSON-RPC message travelling in a single text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    // Order matters for untagged decoding: a `method` member means request.
    Request(Request),
    Response(Response),
}

impl Message {
    /// Decodes one frame.
    ///
    /// # Errors
    ///
    /// [`MessageError::Parse`] for invalid JSON, [`MessageError::Invalid`] for
    /// JSON that is not a request or a well-formed response.
    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        let value: Value = serde_json::from_str(text).map_err(MessageError::Parse)?;
        if !value.is_object() {
            return Err(MessageError::Invalid(
                "expected a JSON object (batches are not supported)".to_string(),
            ));
        }
        let message: Message = serde_json::from_value(value)
            .map_err(|e| MessageError::Invalid(e.to_string()))?;

        match &message {
            Message::Request(request) if request.jsonrpc != JSONRPC_VERSION => {
                return Err(MessageError::Invalid(format!(
                    "unsupported jsonrpc version '{}'",
                    request.jsonrpc
                )));
            }
            Message::Response(r) if r.result.is_some() == r.error.is_some() => {
                return Err(MessageError::Invalid(
                    "response must carry exactly one of result or error".to_string(),
                ));
            }
            _ => {}
        }
        Ok(message)
    }

    /// Encodes the message as a single line of JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Serialize`] if serde_json rejects the value.
    pub fn to_json(&self) -> Result<String, MessageError> {
        serde_json::to_string(self).map_err(MessageError::Serialize)
    }

    /// The method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Response(_) => None,
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
