//! wsrpc-server library crate.
//!
//! A JSON-RPC 2.0 server over WebSocket whose logical sessions survive the
//! client reconnecting on a new socket.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Client (JSON-RPC over WebSocket)
//!         ↕
//! [wsrpc-server]
//!   ├── domain/           ServerConfig and its layered loading
//!   ├── application/
//!   │     ├── bridge      Lifecycle callbacks → engine / registry (fault boundaries)
//!   │     ├── protocol_manager  JSON-RPC dispatch: ping, connect, closeSession, app methods
//!   │     ├── sessions    Session registry with the reconnection grace timer
//!   │     └── handler     RequestHandler hook for application methods
//!   └── infrastructure/
//!         └── ws_server/  Accept loop, handshake, keep-alive (tokio-tungstenite)
//! ```
//!
//! # Layer rules
//!
//! - `domain` does no I/O beyond reading the optional config file.
//! - `application` depends on `domain` and `wsrpc-core` only; it never sees a
//!   socket, only the `Transport` trait.
//! - `infrastructure` depends on every other layer plus `tokio-tungstenite`.

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: bridge, protocol engine and session registry.
pub mod application;

/// Infrastructure layer: WebSocket server.
pub mod infrastructure;
