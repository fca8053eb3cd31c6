//! # wsrpc-core
//!
//! Shared library for wsrpc: the types that let a JSON-RPC session outlive
//! the WebSocket it started on.
//!
//! It has no dependency on a particular WebSocket implementation or on a
//! particular JSON-RPC dispatch table.
//!
//! - **`protocol`** – the JSON-RPC 2.0 message model and the close-status
//!   classification used in lifecycle logs.
//!
//! - **`domain`** – transport ids and session ids, the [`Connection`] wrapper
//!   that serialises every write to one transport, and the rebindable
//!   [`ServerSession`].
//!
//! - **`ports`** – the traits the bridge uses to reach its collaborators
//!   (session registry, protocol engine) and the adapters it hands to the
//!   engine (session factory, response sender).

pub mod domain;
pub mod ports;
pub mod protocol;

pub use domain::connection::{Connection, ConnectionInfo, SendOutcome, Transport, TransportError};
pub use domain::ids::{SessionId, TransportId};
pub use domain::session::{DeliveryError, ServerSession};
pub use ports::{EngineError, ProtocolEngine, ResponseSender, ServerSessionFactory, SessionRegistry};
pub use protocol::close::{classify, CloseCategory, CloseStatus};
pub use protocol::message::{Message, MessageError, Request, Response, ResponseError};
