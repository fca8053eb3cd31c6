//! Infrastructure layer for wsrpc-server.
//!
//! All socket I/O lives here: binding the listener, the WebSocket handshake,
//! reading frames and writing them back.  Every event is handed to the
//! application layer's `SessionBridge`; nothing here parses JSON-RPC.

pub mod ws_server;

pub use ws_server::{run_server, serve, WsTransport};
