//! Identifier newtypes.
//!
//! Two kinds of id flow through the bridge and they must never be confused:
//!
//! - [`TransportId`] names one physical connection.  A client that reconnects
//!   gets a brand-new one.
//! - [`SessionId`] names the logical JSON-RPC conversation and survives
//!   reconnection.
//!
//! Both are opaque strings on the wire; fresh ones are UUID v4 text.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Id of a single physical transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportId(String);

impl TransportId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id (UUID v4).
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransportId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TransportId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Id of a logical JSON-RPC session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id (UUID v4).
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_transport_ids_differ() {
        assert_ne!(TransportId::random(), TransportId::random());
    }

    #[test]
    fn test_random_session_id_is_uuid_text() {
        let id = SessionId::random();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_session_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&SessionId::new("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }
}
