//! Domain layer for wsrpc-server.
//!
//! Pure configuration types with no I/O beyond reading the optional TOML
//! file.  Message and session types live in `wsrpc-core`.

pub mod config;

pub use config::{ConfigError, ConfigLayer, ServerConfig};
