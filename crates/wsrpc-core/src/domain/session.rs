//! The logical server session.
//!
//! A [`ServerSession`] is what the protocol engine and the application talk
//! to.  It outlives any single connection: when a client reconnects, the
//! session is *rebound* to the new [`Connection`] and everybody holding the
//! session keeps working without noticing the move.
//!
//! ```text
//!            rebind(B)
//! session ──────────────► connection B   (live)
//!    ╳
//!    └──── connection A   (retired: every later write is dropped)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::connection::{Connection, SendOutcome, TransportError};
use crate::domain::ids::{SessionId, TransportId};
use crate::ports::SessionRegistry;
use crate::protocol::close::CloseStatus;
use crate::protocol::message::{Message, MessageError};

/// Errors raised while delivering a message to a connection.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Encode(#[from] MessageError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Logical JSON-RPC session state.
pub struct ServerSession {
    session_id: SessionId,
    register_info: Option<Value>,
    connection: RwLock<Arc<Connection>>,
    gracefully_closed: AtomicBool,
    registry: Weak<dyn SessionRegistry>,
}

impl ServerSession {
    /// Creates a session bound to `connection`.
    ///
    /// Only a weak handle to the registry is kept: the registry owns the
    /// session, not the other way round.
    pub fn new(
        session_id: SessionId,
        register_info: Option<Value>,
        connection: Arc<Connection>,
        registry: &Arc<dyn SessionRegistry>,
    ) -> Self {
        Self {
            session_id,
            register_info,
            connection: RwLock::new(connection),
            gracefully_closed: AtomicBool::new(false),
            registry: Arc::downgrade(registry),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Whatever the client sent when the session was registered.
    pub fn register_info(&self) -> Option<&Value> {
        self.register_info.as_ref()
    }

    /// The connection the session is currently bound to.
    pub fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.connection.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn transport_id(&self) -> TransportId {
        self.connection().id().clone()
    }

    /// `true` once the application protocol has finalised the session.
    pub fn is_gracefully_closed(&self) -> bool {
        self.gracefully_closed.load(Ordering::Acquire)
    }

    pub fn set_gracefully_closed(&self) {
        self.gracefully_closed.store(true, Ordering::Release);
    }

    /// Moves the session to `new_connection`.
    ///
    /// The old connection is retired and the binding swapped while holding
    /// the old connection's write lock, so a concurrent send either completes
    /// on the old connection before the rebind or is redirected to the new
    /// one; it never observes a half-updated binding.
    ///
    /// Returns the previous connection, or `None` if the session was already
    /// bound to `new_connection`.
    pub async fn rebind(&self, new_connection: Arc<Connection>) -> Option<Arc<Connection>> {
        let old = self.connection();
        if Arc::ptr_eq(&old, &new_connection) {
            return None;
        }

        let new_id = new_connection.id().clone();
        old.retire_with(|| {
            let mut slot = self.connection.write().unwrap_or_else(PoisonError::into_inner);
            *slot = new_connection;
        })
        .await;

        debug!(
            "session {}: rebound from transport {} to {}",
            self.session_id,
            old.id(),
            new_id
        );
        Some(old)
    }

    /// Sends a server-initiated message to whichever connection is live.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::Encode`] if the message cannot be serialised,
    /// [`DeliveryError::Transport`] if the write fails.
    pub async fn send(&self, message: &Message) -> Result<SendOutcome, DeliveryError> {
        let text = message.to_json()?;
        self.send_text(&text).await
    }

    /// Sends pre-serialised JSON text, following a concurrent rebind.
    ///
    /// # Errors
    ///
    /// Propagates the transport's write error.
    pub async fn send_text(&self, text: &str) -> Result<SendOutcome, DeliveryError> {
        loop {
            let connection = self.connection();
            let outcome = connection.send_text(text).await?;
            if outcome == SendOutcome::Retired && !Arc::ptr_eq(&connection, &self.connection()) {
                // Lost the race with a rebind; the binding already points at
                // the new connection.
                continue;
            }
            return Ok(outcome);
        }
    }

    /// Finalises the session from the application side.
    ///
    /// Marks it gracefully closed (so the transport close that follows is not
    /// treated as a disconnect), removes it from the registry and closes the
    /// live connection with `status`.
    ///
    /// # Errors
    ///
    /// Propagates the transport's close error.
    pub async fn close(&self, status: &CloseStatus) -> Result<(), TransportError> {
        self.set_gracefully_closed();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_session(&self.session_id).await;
        }
        self.connection().close(status).await
    }
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("session_id", &self.session_id)
            .field("transport_id", &self.transport_id())
            .field("gracefully_closed", &self.is_gracefully_closed())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::connection::tests::RecordingTransport;
    use crate::domain::connection::Transport;
    use crate::protocol::message::Request;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Registry double that only records removals.
    #[derive(Default)]
    struct RemovalRecorder {
        removed: Mutex<Vec<SessionId>>,
    }

    #[async_trait]
    impl SessionRegistry for RemovalRecorder {
        async fn session_by_transport_id(
            &self,
            _transport_id: &TransportId,
        ) -> Option<Arc<ServerSession>> {
            None
        }

        async fn close_session_if_timeout(&self, _transport_id: &TransportId, _reason: &str) {}

        async fn remove_session(&self, session_id: &SessionId) {
            self.removed.lock().unwrap().push(session_id.clone());
        }
    }

    fn notification() -> Message {
        Message::from(Request::notification("onEvent", None))
    }

    #[tokio::test]
    async fn test_send_goes_to_bound_connection() {
        // Arrange
        let transport = RecordingTransport::new("a");
        let registry: Arc<dyn SessionRegistry> = Arc::new(RemovalRecorder::default());
        let session = ServerSession::new(
            SessionId::new("s"),
            None,
            Connection::new(transport.clone()),
            &registry,
        );

        // Act
        let outcome = session.send(&notification()).await.unwrap();

        // Assert
        assert_eq!(outcome, SendOutcome::Delivered);
        assert_eq!(transport.frames().len(), 1);
        assert_eq!(session.transport_id(), TransportId::new("a"));
    }

    #[tokio::test]
    async fn test_rebind_redirects_sends_and_retires_old_connection() {
        // Arrange: session bound to A, then the client comes back on B
        let a = RecordingTransport::new("a");
        let b = RecordingTransport::new("b");
        let conn_a = Connection::new(a.clone());
        let conn_b = Connection::new(b.clone());
        let registry: Arc<dyn SessionRegistry> = Arc::new(RemovalRecorder::default());
        let session = ServerSession::new(SessionId::new("s"), None, conn_a.clone(), &registry);

        // Act
        let previous = session.rebind(conn_b).await;
        session.send(&notification()).await.unwrap();
        let stale = conn_a.send_text("stale").await.unwrap();

        // Assert
        assert!(Arc::ptr_eq(&previous.unwrap(), &conn_a));
        assert_eq!(session.transport_id(), TransportId::new("b"));
        assert_eq!(b.frames().len(), 1, "push must reach the new connection");
        assert!(a.frames().is_empty(), "old connection must never be written");
        assert_eq!(stale, SendOutcome::Retired);
    }

    #[tokio::test]
    async fn test_rebind_to_same_connection_is_noop() {
        let conn = Connection::new(RecordingTransport::new("a"));
        let registry: Arc<dyn SessionRegistry> = Arc::new(RemovalRecorder::default());
        let session = ServerSession::new(SessionId::new("s"), None, conn.clone(), &registry);

        assert!(session.rebind(conn.clone()).await.is_none());
        assert!(!conn.is_retired());
    }

    #[tokio::test]
    async fn test_close_marks_graceful_and_unregisters() {
        // Arrange
        let transport = RecordingTransport::new("a");
        let recorder = Arc::new(RemovalRecorder::default());
        let registry: Arc<dyn SessionRegistry> = recorder.clone();
        let session = ServerSession::new(
            SessionId::new("s"),
            Some(serde_json::json!({"user": "x"})),
            Connection::new(transport.clone()),
            &registry,
        );

        // Act
        session.close(&CloseStatus::normal()).await.unwrap();

        // Assert
        assert!(session.is_gracefully_closed());
        assert_eq!(*recorder.removed.lock().unwrap(), vec![SessionId::new("s")]);
        assert!(!transport.is_open());
        assert_eq!(session.register_info().unwrap()["user"], "x");
    }

    #[test]
    fn test_close_after_registry_dropped_still_closes_transport() {
        let transport = RecordingTransport::new("a");
        let registry: Arc<dyn SessionRegistry> = Arc::new(RemovalRecorder::default());
        let session = ServerSession::new(
            SessionId::new("s"),
            None,
            Connection::new(transport.clone()),
            &registry,
        );
        drop(registry);

        tokio_test::block_on(session.close(&CloseStatus::normal())).unwrap();

        assert!(!transport.is_open());
    }
}
