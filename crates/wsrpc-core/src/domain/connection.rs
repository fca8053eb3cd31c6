//! Transport connections and the per-connection write lock.
//!
//! A [`Transport`] is one physical duplex channel (one WebSocket).  The
//! bridge never writes to a `Transport` directly: every transport is wrapped
//! in a [`Connection`], which owns the single write lock for that channel.
//!
//! # Why a lock per connection?
//!
//! A connection receives writes from more than one place at once: the reply
//! to the request currently being processed, and server-initiated pushes
//! triggered by activity on *other* connections.  Two writers must never
//! interleave the bytes of two frames, so every write goes through
//! [`Connection::send_text`], which:
//!
//! 1. acquires the connection's `tokio::sync::Mutex` (FIFO-fair, so writers
//!    are served in the order they arrived),
//! 2. checks that the connection is still open and not retired,
//! 3. writes the whole frame,
//! 4. releases the lock.
//!
//! Different connections have different locks, so they never contend.
//!
//! # Retirement
//!
//! When a logical session moves to a new connection, the old one is
//! *retired* under its own write lock.  From then on every write attempted on
//! it is dropped with [`SendOutcome::Retired`], even if the socket itself is
//! still half-open.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::ids::TransportId;
use crate::protocol::close::CloseStatus;

/// Errors reported by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel is closed; nothing can be written.
    #[error("connection {0} is closed")]
    Closed(TransportId),

    /// The underlying write failed part-way (socket reset, broken pipe…).
    #[error("write failed on connection {id}: {reason}")]
    Write { id: TransportId, reason: String },

    /// Any other transport-level failure (protocol violation, I/O error).
    #[error("transport failure: {0}")]
    Other(String),
}

/// Handshake metadata captured when the connection was established.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub remote_addr: Option<SocketAddr>,
    /// Request URI of the upgrade request (path and query).
    pub uri: Option<String>,
    /// Sub-protocol negotiated during the handshake, if any.
    pub accepted_protocol: Option<String>,
    /// Handshake request headers, in arrival order.
    pub headers: Vec<(String, String)>,
}

/// A single physical duplex channel.
///
/// Implementations do not need to serialise writers themselves;
/// [`Connection`] guarantees at most one `send_text` is in flight.
#[async_trait]
pub trait Transport: Send + Sync {
    fn id(&self) -> &TransportId;

    fn info(&self) -> &ConnectionInfo;

    fn is_open(&self) -> bool;

    /// Writes one complete text frame.
    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Starts the closing handshake with the given status.
    async fn close(&self, status: &CloseStatus) -> Result<(), TransportError>;
}

/// What happened to a frame handed to [`Connection::send_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The whole frame was written.
    Delivered,
    /// The connection was closed; the frame was dropped.
    Closed,
    /// The connection was replaced by a newer one; the frame was dropped.
    Retired,
}

impl SendOutcome {
    pub fn is_delivered(self) -> bool {
        self == SendOutcome::Delivered
    }
}

/// A transport plus its exclusive write lock.
///
/// Always handled as `Arc<Connection>`: the transport adapter, every response
/// sink created for it and the session bound to it share the same instance,
/// and therefore the same lock.
pub struct Connection {
    transport: Arc<dyn Transport>,
    write_lock: Mutex<()>,
    retired: AtomicBool,
}

impl Connection {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            write_lock: Mutex::new(()),
            retired: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &TransportId {
        self.transport.id()
    }

    pub fn info(&self) -> &ConnectionInfo {
        self.transport.info()
    }

    /// `true` while the transport is open and the connection has not been
    /// replaced by a reconnection.
    pub fn is_open(&self) -> bool {
        !self.is_retired() && self.transport.is_open()
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Writes one frame under the connection's write lock.
    ///
    /// The open check happens under the same lock as the write, so a frame is
    /// never written after the connection was seen closed or retired.  A
    /// closed connection is not an error: the frame is dropped and the
    /// outcome says so.
    ///
    /// # Errors
    ///
    /// Returns the transport's error when the write itself fails.
    pub async fn send_text(&self, text: &str) -> Result<SendOutcome, TransportError> {
        let _guard = self.write_lock.lock().await;

        if self.is_retired() {
            return Ok(SendOutcome::Retired);
        }
        if !self.transport.is_open() {
            return Ok(SendOutcome::Closed);
        }

        self.transport.send_text(text).await?;
        Ok(SendOutcome::Delivered)
    }

    /// Retires this connection and runs `swap` while still holding the write
    /// lock.
    ///
    /// Waits for an in-flight write to finish first.  Any writer that acquires
    /// the lock afterwards sees the connection retired *and* finds the swap
    /// already done.
    pub async fn retire_with<F: FnOnce()>(&self, swap: F) {
        let _guard = self.write_lock.lock().await;
        self.retired.store(true, Ordering::Release);
        swap();
    }

    /// Closes the underlying transport.
    ///
    /// # Errors
    ///
    /// Propagates the transport's close error.
    pub async fn close(&self, status: &CloseStatus) -> Result<(), TransportError> {
        let _guard = self.write_lock.lock().await;
        self.transport.close(status).await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", self.id())
            .field("open", &self.transport.is_open())
            .field("retired", &self.is_retired())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
