//! In-memory session registry with a reconnection grace period.
//!
//! # Lifecycle of a session entry
//!
//! ```text
//!  register ──► bound to T1 ──(T1 closes abnormally)──► waiting (timer running)
//!                   ▲                                        │        │
//!                   └──────── rebind_transport(T2) ◄─────────┘        │
//!                                                                     ▼
//!                                              timer fires ──► removed, handler told
//! ```
//!
//! A graceful `closeSession` goes straight to `remove_session` and never
//! starts a timer.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use wsrpc_core::{ServerSession, SessionId, SessionRegistry, TransportId};

use super::handler::RequestHandler;

/// Reason given to the handler for a session dropped because its transport
/// resumed another session.
pub const DISPLACED_REASON: &str = "transport resumed another session";

#[derive(Default)]
struct State {
    sessions: HashMap<SessionId, Arc<ServerSession>>,
    by_transport: HashMap<TransportId, SessionId>,
    pending_close: HashMap<SessionId, JoinHandle<()>>,
}

impl State {
    fn cancel_timer(&mut self, session_id: &SessionId) -> bool {
        match self.pending_close.remove(session_id) {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }
}

/// Owns every live session and decides when a disconnected one is evicted.
pub struct SessionsManager {
    state: RwLock<State>,
    reconnection_timeout: Duration,
    handler: Arc<dyn RequestHandler>,
    label: String,
    // Grace timers hold a weak handle so a dropped manager stops them.
    weak_self: Weak<SessionsManager>,
}

impl SessionsManager {
    pub fn new(reconnection_timeout: Duration, handler: Arc<dyn RequestHandler>) -> Arc<Self> {
        Self::with_label(reconnection_timeout, handler, "")
    }

    pub fn with_label(
        reconnection_timeout: Duration,
        handler: Arc<dyn RequestHandler>,
        label: &str,
    ) -> Arc<Self> {
        let label = if label.is_empty() {
            String::new()
        } else {
            format!("[{label}] ")
        };
        Arc::new_cyclic(|weak_self| Self {
            state: RwLock::new(State::default()),
            reconnection_timeout,
            handler,
            label,
            weak_self: weak_self.clone(),
        })
    }

    /// Adds a freshly created session under its current transport.
    pub async fn register(&self, session: Arc<ServerSession>) {
        let session_id = session.session_id().clone();
        let transport_id = session.transport_id();
        let mut state = self.state.write().await;
        state.by_transport.insert(transport_id, session_id.clone());
        state.sessions.insert(session_id, session);
    }

    pub async fn get(&self, session_id: &SessionId) -> Option<Arc<ServerSession>> {
        self.state.read().await.sessions.get(session_id).cloned()
    }

    /// Records that `session` now lives on its current transport instead of
    /// `previous`, and cancels a pending eviction.
    ///
    /// A different session already bound to that transport (one created
    /// lazily before the client resumed) is dropped and the handler told.
    pub async fn rebind_transport(&self, session: &Arc<ServerSession>, previous: &TransportId) {
        let session_id = session.session_id();
        let current = session.transport_id();

        let displaced = {
            let mut state = self.state.write().await;

            if state.by_transport.get(previous) == Some(session_id) {
                state.by_transport.remove(previous);
            }
            let replaced = state.by_transport.insert(current.clone(), session_id.clone());
            let displaced = match replaced {
                Some(other) if other != *session_id => {
                    state.cancel_timer(&other);
                    state.by_transport.retain(|_, sid| *sid != other);
                    state.sessions.remove(&other)
                }
                _ => None,
            };

            if state.cancel_timer(session_id) {
                info!(
                    "{}Session {} reconnected on transport {} before its grace period expired",
                    self.label, session_id, current
                );
            }
            displaced
        };

        if let Some(displaced) = displaced {
            info!(
                "{}Session {} dropped: transport {} now carries resumed session {}",
                self.label,
                displaced.session_id(),
                current,
                session_id
            );
            self.handler
                .after_connection_closed(&displaced, DISPLACED_REASON)
                .await;
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Timer body: evicts the session unless it moved to another transport.
    async fn expire(&self, session_id: SessionId, transport_id: TransportId, reason: String) {
        let session = {
            let mut state = self.state.write().await;
            state.pending_close.remove(&session_id);

            let still_disconnected = state
                .sessions
                .get(&session_id)
                .is_some_and(|s| s.transport_id() == transport_id);
            if !still_disconnected {
                return;
            }
            state.by_transport.retain(|_, sid| *sid != session_id);
            state.sessions.remove(&session_id)
        };

        if let Some(session) = session {
            info!(
                "{}Session {} closed after {:?} without reconnection",
                self.label, session_id, self.reconnection_timeout
            );
            self.handler.after_connection_closed(&session, &reason).await;
        }
    }
}

#[async_trait]
impl SessionRegistry for SessionsManager {
    async fn session_by_transport_id(
        &self,
        transport_id: &TransportId,
    ) -> Option<Arc<ServerSession>> {
        let state = self.state.read().await;
        let session_id = state.by_transport.get(transport_id)?;
        state.sessions.get(session_id).cloned()
    }

    async fn close_session_if_timeout(&self, transport_id: &TransportId, reason: &str) {
        let mut state = self.state.write().await;

        let Some(session_id) = state.by_transport.remove(transport_id) else {
            debug!(
                "{}Transport {} closed but no session is bound to it",
                self.label, transport_id
            );
            return;
        };
        let bound_here = state
            .sessions
            .get(&session_id)
            .is_some_and(|s| s.transport_id() == *transport_id);
        if !bound_here {
            debug!(
                "{}Session {} already moved away from transport {}",
                self.label, session_id, transport_id
            );
            return;
        }

        debug!(
            "{}Session {} waits {:?} for reconnection",
            self.label, session_id, self.reconnection_timeout
        );

        let weak = self.weak_self.clone();
        let timeout = self.reconnection_timeout;
        let (sid, tid, reason) = (session_id.clone(), transport_id.clone(), reason.to_string());
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(manager) = weak.upgrade() {
                manager.expire(sid, tid, reason).await;
            }
        });

        state.cancel_timer(&session_id);
        state.pending_close.insert(session_id, timer);
    }

    async fn remove_session(&self, session_id: &SessionId) {
        let mut state = self.state.write().await;
        state.cancel_timer(session_id);
        state.by_transport.retain(|_, sid| sid != session_id);
        if state.sessions.remove(session_id).is_some() {
            debug!("{}Session {} removed", self.label, session_id);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::recording_connection;
    use serde_json::Value;
    use std::sync::Mutex;
    use wsrpc_core::{Request, ResponseError};

    const GRACE: Duration = Duration::from_secs(10);

    #[derive(Default)]
    struct ClosedRecorder {
        closed: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl RequestHandler for ClosedRecorder {
        async fn handle_request(
            &self,
            _session: &Arc<ServerSession>,
            _request: &Request,
        ) -> Result<Value, ResponseError> {
            Ok(Value::Null)
        }

        async fn after_connection_closed(&self, session: &Arc<ServerSession>, reason: &str) {
            self.closed
                .lock()
                .unwrap()
                .push((session.session_id().to_string(), reason.to_string()));
        }
    }

    async fn manager_with_session(
        transport: &str,
    ) -> (Arc<SessionsManager>, Arc<ClosedRecorder>, Arc<ServerSession>) {
        let handler = Arc::new(ClosedRecorder::default());
        let manager = SessionsManager::new(GRACE, handler.clone());
        let registry: Arc<dyn SessionRegistry> = manager.clone();
        let (_t, conn) = recording_connection(transport);
        let session = Arc::new(ServerSession::new(SessionId::new("s-1"), None, conn, &registry));
        manager.register(Arc::clone(&session)).await;
        (manager, handler, session)
    }

    #[tokio::test]
    async fn test_register_makes_session_reachable_both_ways() {
        let (manager, _h, _s) = manager_with_session("t-1").await;

        assert!(manager.get(&SessionId::new("s-1")).await.is_some());
        let by_transport = manager
            .session_by_transport_id(&TransportId::new("t-1"))
            .await
            .unwrap();
        assert_eq!(by_transport.session_id(), &SessionId::new("s-1"));
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_evicted_after_grace_period() {
        // Arrange
        let (manager, handler, _s) = manager_with_session("t-1").await;

        // Act
        manager
            .close_session_if_timeout(&TransportId::new("t-1"), "connection reset")
            .await;
        tokio::time::sleep(GRACE - Duration::from_millis(1)).await;
        let during_grace = manager.get(&SessionId::new("s-1")).await.is_some();
        tokio::time::sleep(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;

        // Assert
        assert!(during_grace);
        assert!(manager.is_empty().await);
        assert_eq!(
            *handler.closed.lock().unwrap(),
            vec![("s-1".to_string(), "connection reset".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnection_cancels_eviction() {
        // Arrange
        let (manager, handler, session) = manager_with_session("t-1").await;
        manager
            .close_session_if_timeout(&TransportId::new("t-1"), "reset")
            .await;

        // Act: the client comes back on t-2 within the grace period
        let (_t2, conn2) = recording_connection("t-2");
        session.rebind(conn2).await;
        manager
            .rebind_transport(&session, &TransportId::new("t-1"))
            .await;
        tokio::time::sleep(GRACE * 2).await;

        // Assert
        assert!(manager.get(&SessionId::new("s-1")).await.is_some());
        assert!(manager
            .session_by_transport_id(&TransportId::new("t-2"))
            .await
            .is_some());
        assert!(handler.closed.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_of_stale_transport_is_ignored() {
        // Arrange: session already moved from t-1 to t-2
        let (manager, handler, session) = manager_with_session("t-1").await;
        let (_t2, conn2) = recording_connection("t-2");
        session.rebind(conn2).await;
        manager
            .rebind_transport(&session, &TransportId::new("t-1"))
            .await;

        // Act: the old transport's close arrives late
        manager
            .close_session_if_timeout(&TransportId::new("t-1"), "late")
            .await;
        tokio::time::sleep(GRACE * 2).await;

        // Assert
        assert_eq!(manager.len().await, 1);
        assert!(handler.closed.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_session_clears_mappings_and_timer() {
        let (manager, handler, _s) = manager_with_session("t-1").await;
        manager
            .close_session_if_timeout(&TransportId::new("t-1"), "reset")
            .await;

        manager.remove_session(&SessionId::new("s-1")).await;
        tokio::time::sleep(GRACE * 2).await;

        assert!(manager.is_empty().await);
        assert!(manager
            .session_by_transport_id(&TransportId::new("t-1"))
            .await
            .is_none());
        assert!(handler.closed.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_on_transport_with_lazy_session_drops_the_lazy_one() {
        // Arrange: s-1 on a; the client reconnects on b and a second session
        // is created there before it resumes s-1
        let (manager, handler, session) = manager_with_session("a").await;
        let registry: Arc<dyn SessionRegistry> = manager.clone();
        let (_tb, conn_b) = recording_connection("b");
        let lazy = Arc::new(ServerSession::new(
            SessionId::new("s-lazy"),
            None,
            Arc::clone(&conn_b),
            &registry,
        ));
        manager.register(lazy).await;

        // Act: s-1 moves to b, then b drops for good
        session.rebind(conn_b).await;
        manager.rebind_transport(&session, &TransportId::new("a")).await;
        manager
            .close_session_if_timeout(&TransportId::new("b"), "reset")
            .await;
        tokio::time::sleep(GRACE * 6).await;
        tokio::task::yield_now().await;

        // Assert: nothing is left behind
        assert!(manager.is_empty().await);
        assert_eq!(
            *handler.closed.lock().unwrap(),
            vec![
                ("s-lazy".to_string(), DISPLACED_REASON.to_string()),
                ("s-1".to_string(), "reset".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_close_of_unknown_transport_is_a_no_op() {
        let (manager, _h, _s) = manager_with_session("t-1").await;

        manager
            .close_session_if_timeout(&TransportId::new("nobody"), "reset")
            .await;

        assert_eq!(manager.len().await, 1);
    }
}
