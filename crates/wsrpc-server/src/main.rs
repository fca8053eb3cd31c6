//! wsrpc server: entry point.
//!
//! Serves JSON-RPC 2.0 over WebSocket with sessions that survive a client
//! reconnecting on a new socket.  Application methods other than the built-in
//! `ping`, `connect` and `closeSession` are answered by the demo
//! [`EchoHandler`](wsrpc_server::application::EchoHandler).
//!
//! # Usage
//!
//! ```text
//! wsrpc-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>                   TOML config file
//!   --ws-bind <ADDR>                  Bind address [default: 0.0.0.0]
//!   --ws-port <PORT>                  WebSocket listener port [default: 8888]
//!   --ping-interval <SECS>            Keep-alive ping interval [default: 10]
//!   --ping-timeout <SECS>             Close after this long without traffic [default: 30]
//!   --reconnection-timeout <SECS>     Grace period for reconnecting clients [default: 10]
//!   --label <LABEL>                   Log line prefix
//!   --subprotocol <NAME>              Accepted sub-protocol (repeatable)
//!   --log-level <FILTER>              Log filter when RUST_LOG is unset [default: info]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                      | Flag                     |
//! |-------------------------------|--------------------------|
//! | `WSRPC_CONFIG`                | `--config`               |
//! | `WSRPC_WS_BIND`               | `--ws-bind`              |
//! | `WSRPC_WS_PORT`               | `--ws-port`              |
//! | `WSRPC_PING_INTERVAL`         | `--ping-interval`        |
//! | `WSRPC_PING_TIMEOUT`          | `--ping-timeout`         |
//! | `WSRPC_RECONNECTION_TIMEOUT`  | `--reconnection-timeout` |
//! | `WSRPC_LABEL`                 | `--label`                |
//! | `WSRPC_LOG_LEVEL`             | `--log-level`            |
//!
//! Flags beat environment variables, which beat the config file, which beats
//! the built-in defaults.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wsrpc_server::application::EchoHandler;
use wsrpc_server::domain::{ConfigLayer, ServerConfig};
use wsrpc_server::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// JSON-RPC over WebSocket server with reconnectable sessions.
///
/// Every value flag is optional so that an unset flag falls through to the
/// config file and then to the defaults.
#[derive(Debug, Parser)]
#[command(
    name = "wsrpc-server",
    about = "JSON-RPC 2.0 over WebSocket with reconnectable sessions",
    version
)]
struct Cli {
    /// TOML file with any of the settings below.
    #[arg(long, env = "WSRPC_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the WebSocket server to.
    #[arg(long, env = "WSRPC_WS_BIND")]
    ws_bind: Option<String>,

    /// TCP port for the WebSocket server.
    #[arg(long, env = "WSRPC_WS_PORT")]
    ws_port: Option<u16>,

    /// Seconds between keep-alive pings.
    #[arg(long, env = "WSRPC_PING_INTERVAL")]
    ping_interval: Option<u64>,

    /// Seconds without any inbound frame before the connection is closed.
    #[arg(long, env = "WSRPC_PING_TIMEOUT")]
    ping_timeout: Option<u64>,

    /// Seconds a disconnected session waits for its client to come back.
    #[arg(long, env = "WSRPC_RECONNECTION_TIMEOUT")]
    reconnection_timeout: Option<u64>,

    /// Prefix for every log line (`[label] `).
    #[arg(long, env = "WSRPC_LABEL")]
    label: Option<String>,

    /// Sub-protocol to accept; repeat for several.
    #[arg(long = "subprotocol")]
    subprotocols: Vec<String>,

    /// `tracing` filter used when `RUST_LOG` is not set.
    #[arg(long, env = "WSRPC_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// The flag/env layer of the configuration.
    fn to_layer(&self) -> ConfigLayer {
        ConfigLayer {
            ws_bind: self.ws_bind.clone(),
            ws_port: self.ws_port,
            ping_interval_secs: self.ping_interval,
            ping_timeout_secs: self.ping_timeout,
            reconnection_timeout_secs: self.reconnection_timeout,
            label: self.label.clone(),
            subprotocols: (!self.subprotocols.is_empty()).then(|| self.subprotocols.clone()),
            log_level: self.log_level.clone(),
        }
    }

    /// Merges flags, the optional config file and the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// the merged values are invalid.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let file_layer = match &self.config {
            Some(path) => ConfigLayer::load(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?,
            None => ConfigLayer::default(),
        };
        ServerConfig::from_layers([self.to_layer(), file_layer])
            .context("invalid server configuration")
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_server_config()?;

    // RUST_LOG wins; otherwise the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        "wsrpc server starting: ws={}, ping={:?}/{:?}, reconnection={:?}",
        config.ws_bind_addr, config.ping_interval, config.ping_timeout, config.reconnection_timeout
    );

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, Arc::new(EchoHandler), running).await?;

    info!("wsrpc server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
