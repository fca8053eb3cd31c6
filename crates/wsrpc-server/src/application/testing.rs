//! Test doubles shared by the application-layer unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use wsrpc_core::{CloseStatus, Connection, ConnectionInfo, Transport, TransportError, TransportId};

/// Transport that records every frame written to it.
pub(crate) struct RecordingTransport {
    id: TransportId,
    info: ConnectionInfo,
    open: AtomicBool,
    frames: Mutex<Vec<String>>,
    closes: Mutex<Vec<CloseStatus>>,
}

impl RecordingTransport {
    pub(crate) fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: TransportId::new(id),
            info: ConnectionInfo {
                remote_addr: Some("10.0.0.7:51000".parse().unwrap()),
                uri: Some("/jsonrpc".to_string()),
                accepted_protocol: None,
                headers: vec![("host".to_string(), "localhost".to_string())],
            },
            open: AtomicBool::new(true),
            frames: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub(crate) fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }

    /// Every frame decoded as JSON.
    pub(crate) fn json_frames(&self) -> Vec<Value> {
        self.frames()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    pub(crate) fn closes(&self) -> Vec<CloseStatus> {
        self.closes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn id(&self) -> &TransportId {
        &self.id
    }

    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.frames.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn close(&self, status: &CloseStatus) -> Result<(), TransportError> {
        self.set_open(false);
        self.closes.lock().unwrap().push(status.clone());
        Ok(())
    }
}

/// A connection over a fresh [`RecordingTransport`].
pub(crate) fn recording_connection(id: &str) -> (Arc<RecordingTransport>, Arc<Connection>) {
    let transport = RecordingTransport::new(id);
    let connection = Connection::new(transport.clone());
    (transport, connection)
}
