//! Domain entities: identifiers, connections and logical sessions.
//!
//! Nothing in here knows about WebSockets or JSON-RPC dispatch.  A
//! [`Connection`](connection::Connection) is anything that can write a text
//! frame; a [`ServerSession`](session::ServerSession) is a conversation that
//! can move from one connection to the next.

pub mod connection;
pub mod ids;
pub mod session;
