//! Application layer for wsrpc-server.
//!
//! Everything between "a frame arrived on a socket" and "a JSON-RPC method
//! ran": the lifecycle bridge, the protocol engine and the session registry.
//! None of it opens sockets; the infrastructure layer drives it through
//! [`SessionBridge`].
//!
//! # Wiring
//!
//! ```text
//! SessionBridge ──► JsonRpcProtocolManager ──► RequestHandler
//!       │                    │
//!       └──────► SessionsManager ◄──┘
//! ```

pub mod bridge;
pub mod handler;
pub mod protocol_manager;
pub mod sessions;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

pub use bridge::{
    isolate, ConnectionResponseSender, ConnectionSessionFactory, Fault, SessionBridge,
};
pub use handler::{EchoHandler, RequestHandler};
pub use protocol_manager::JsonRpcProtocolManager;
pub use sessions::SessionsManager;

use crate::domain::ServerConfig;

/// Builds the bridge with its engine and registry for one server instance.
pub fn build_bridge(
    config: &ServerConfig,
    handler: Arc<dyn RequestHandler>,
) -> Arc<SessionBridge> {
    let sessions = SessionsManager::with_label(
        config.reconnection_timeout,
        Arc::clone(&handler),
        &config.label,
    );
    let engine =
        JsonRpcProtocolManager::new(Arc::clone(&sessions), handler).with_label(&config.label);
    Arc::new(SessionBridge::new(Arc::new(engine), sessions).with_label(&config.label))
}
