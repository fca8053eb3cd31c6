//! Server configuration types.
//!
//! [`ServerConfig`] is the single source of truth for all runtime settings.
//! It is assembled from up to three layers, highest priority first:
//!
//! 1. command-line flags / environment variables (see `main.rs`),
//! 2. an optional TOML file (`--config wsrpc.toml`),
//! 3. built-in defaults.
//!
//! Each layer is a [`ConfigLayer`] in which every field is optional; layers
//! are merged field by field and the result is validated once by
//! [`ServerConfig::from_layers`].
//!
//! # TOML example
//!
//! ```toml
//! ws_bind = "127.0.0.1"
//! ws_port = 8888
//! ping_interval_secs = 10
//! ping_timeout_secs = 30
//! reconnection_timeout_secs = 10
//! label = "edge-1"
//! subprotocols = ["jsonrpc"]
//! log_level = "debug"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_WS_BIND: &str = "0.0.0.0";
const DEFAULT_WS_PORT: u16 = 8888;
const DEFAULT_PING_INTERVAL_SECS: u64 = 10;
const DEFAULT_PING_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RECONNECTION_TIMEOUT_SECS: u64 = 10;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Bind host and port do not form a socket address.
    #[error("invalid WebSocket bind address: '{0}'")]
    InvalidAddress(String),

    /// A value is out of range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// One configuration source with every field optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    pub ws_bind: Option<String>,
    pub ws_port: Option<u16>,
    pub ping_interval_secs: Option<u64>,
    pub ping_timeout_secs: Option<u64>,
    pub reconnection_timeout_secs: Option<u64>,
    pub label: Option<String>,
    pub subprotocols: Option<Vec<String>>,
    pub log_level: Option<String>,
}

impl ConfigLayer {
    /// Parses a layer from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Reads a layer from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if its content is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Fills every field missing from `self` with the value from `lower`.
    pub fn or(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            ws_bind: self.ws_bind.or(lower.ws_bind),
            ws_port: self.ws_port.or(lower.ws_port),
            ping_interval_secs: self.ping_interval_secs.or(lower.ping_interval_secs),
            ping_timeout_secs: self.ping_timeout_secs.or(lower.ping_timeout_secs),
            reconnection_timeout_secs: self
                .reconnection_timeout_secs
                .or(lower.reconnection_timeout_secs),
            label: self.label.or(lower.label),
            subprotocols: self.subprotocols.or(lower.subprotocols),
            log_level: self.log_level.or(lower.log_level),
        }
    }
}

/// All runtime configuration for the server.
///
/// Build this once at startup and share it behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use wsrpc_server::domain::ServerConfig;
///
/// let cfg = ServerConfig::default();
/// assert_eq!(cfg.ws_bind_addr.port(), 8888);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub ws_bind_addr: SocketAddr,

    /// How often the server sends a WebSocket Ping on an idle connection.
    pub ping_interval: Duration,

    /// A connection that sends nothing (not even a Pong) for this long is
    /// closed with the keep-alive timeout status.
    pub ping_timeout: Duration,

    /// How long a session whose connection dropped waits for the client to
    /// reconnect before it is evicted.
    pub reconnection_timeout: Duration,

    /// Prefix for every log line of this server (`[label] `).  Empty = none.
    pub label: String,

    /// Sub-protocols the server accepts, in preference order.
    pub subprotocols: Vec<String>,

    /// Default `tracing` filter when `RUST_LOG` is not set.
    pub log_level: String,
}

impl ServerConfig {
    /// Merges `layers` (highest priority first) over the defaults and
    /// validates the result.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidAddress`] when the bind host is not an IP
    /// address; [`ConfigError::InvalidValue`] when an interval is zero or the
    /// ping timeout is shorter than the ping interval.
    pub fn from_layers(layers: impl IntoIterator<Item = ConfigLayer>) -> Result<Self, ConfigError> {
        let merged = layers
            .into_iter()
            .fold(ConfigLayer::default(), |higher, lower| higher.or(lower));

        let ws_bind = merged.ws_bind.unwrap_or_else(|| DEFAULT_WS_BIND.to_string());
        let ws_port = merged.ws_port.unwrap_or(DEFAULT_WS_PORT);
        let ws_bind_addr: SocketAddr = format!("{ws_bind}:{ws_port}")
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(format!("{ws_bind}:{ws_port}")))?;

        let ping_interval = Duration::from_secs(
            merged.ping_interval_secs.unwrap_or(DEFAULT_PING_INTERVAL_SECS),
        );
        let ping_timeout =
            Duration::from_secs(merged.ping_timeout_secs.unwrap_or(DEFAULT_PING_TIMEOUT_SECS));
        let reconnection_timeout = Duration::from_secs(
            merged
                .reconnection_timeout_secs
                .unwrap_or(DEFAULT_RECONNECTION_TIMEOUT_SECS),
        );

        if ping_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "ping_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if ping_timeout < ping_interval {
            return Err(ConfigError::InvalidValue {
                field: "ping_timeout_secs",
                reason: format!(
                    "{}s is shorter than the ping interval ({}s)",
                    ping_timeout.as_secs(),
                    ping_interval.as_secs()
                ),
            });
        }

        Ok(Self {
            ws_bind_addr,
            ping_interval,
            ping_timeout,
            reconnection_timeout,
            label: merged.label.unwrap_or_default(),
            subprotocols: merged.subprotocols.unwrap_or_default(),
            log_level: merged
                .log_level
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        })
    }
}

impl Default for ServerConfig {
    /// | Field                | Default        |
    /// |----------------------|----------------|
    /// | ws_bind_addr         | `0.0.0.0:8888` |
    /// | ping_interval        | 10 seconds     |
    /// | ping_timeout         | 30 seconds     |
    /// | reconnection_timeout | 10 seconds     |
    /// | label                | empty          |
    /// | subprotocols         | none           |
    /// | log_level            | `info`         |
    fn default() -> Self {
        Self {
            // Compile-time-known valid socket address.
            ws_bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_WS_PORT)),
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            ping_timeout: Duration::from_secs(DEFAULT_PING_TIMEOUT_SECS),
            reconnection_timeout: Duration::from_secs(DEFAULT_RECONNECTION_TIMEOUT_SECS),
            label: String::new(),
            subprotocols: Vec::new(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_empty_layers() {
        // Arrange / Act
        let from_layers = ServerConfig::from_layers(Vec::new()).unwrap();
        // Assert
        assert_eq!(from_layers, ServerConfig::default());
    }

    #[test]
    fn test_default_bind_port_is_8888() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.ws_bind_addr.port(), 8888);
    }

    #[test]
    fn test_default_reconnection_timeout_is_10s() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.reconnection_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_higher_layer_wins_field_by_field() {
        // Arrange: CLI sets the port, file sets port and label
        let cli = ConfigLayer {
            ws_port: Some(9000),
            ..ConfigLayer::default()
        };
        let file = ConfigLayer {
            ws_port: Some(7000),
            label: Some("edge".to_string()),
            ..ConfigLayer::default()
        };

        // Act
        let cfg = ServerConfig::from_layers([cli, file]).unwrap();

        // Assert
        assert_eq!(cfg.ws_bind_addr.port(), 9000, "CLI must override the file");
        assert_eq!(cfg.label, "edge", "file fills what the CLI left unset");
    }

    #[test]
    fn test_from_toml_str_reads_all_keys() {
        let layer = ConfigLayer::from_toml_str(
            r#"
            ws_bind = "127.0.0.1"
            ws_port = 9100
            ping_interval_secs = 5
            ping_timeout_secs = 15
            reconnection_timeout_secs = 20
            label = "lab"
            subprotocols = ["jsonrpc", "v2"]
            log_level = "debug"
            "#,
        )
        .unwrap();

        let cfg = ServerConfig::from_layers([layer]).unwrap();

        assert_eq!(cfg.ws_bind_addr.to_string(), "127.0.0.1:9100");
        assert_eq!(cfg.ping_interval, Duration::from_secs(5));
        assert_eq!(cfg.ping_timeout, Duration::from_secs(15));
        assert_eq!(cfg.reconnection_timeout, Duration::from_secs(20));
        assert_eq!(cfg.label, "lab");
        assert_eq!(cfg.subprotocols, vec!["jsonrpc", "v2"]);
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn test_from_toml_str_rejects_unknown_keys() {
        let result = ConfigLayer::from_toml_str("master_port = 1");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_bind_host_is_rejected() {
        let layer = ConfigLayer {
            ws_bind: Some("not.an.ip".to_string()),
            ..ConfigLayer::default()
        };
        let result = ServerConfig::from_layers([layer]);
        assert!(matches!(result, Err(ConfigError::InvalidAddress(_))));
    }

    #[test]
    fn test_zero_ping_interval_is_rejected() {
        let layer = ConfigLayer {
            ping_interval_secs: Some(0),
            ..ConfigLayer::default()
        };
        let result = ServerConfig::from_layers([layer]);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "ping_interval_secs", .. })
        ));
    }

    #[test]
    fn test_ping_timeout_shorter_than_interval_is_rejected() {
        let layer = ConfigLayer {
            ping_interval_secs: Some(20),
            ping_timeout_secs: Some(5),
            ..ConfigLayer::default()
        };
        assert!(ServerConfig::from_layers([layer]).is_err());
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let path = Path::new("/definitely/not/here/wsrpc.toml");
        match ConfigLayer::load(path) {
            Err(ConfigError::Io { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected Io error, got {other:?}"),
        }
    }
}
