//! Close status codes and their observability categories.
//!
//! When a WebSocket connection goes away the transport reports a numeric
//! status code (RFC 6455 section 7.4) and a free-text reason.  The bridge
//! never branches on the code itself: it only turns it into a short,
//! greppable label for the log line so an operator can tell a deliberate
//! `normal` close from an `abnormal` network drop or a keep-alive `timeout`.
//!
//! ```text
//! 1000 ──► normal          1006 ──► abnormal        4500 ──► timeout
//! 1001 ──► going_away      1011 ──► server_error    9999 ──► unclassified
//! ```

use std::fmt;

/// Status code used when the server gives up on a silent connection.
///
/// Same value as the "session not reliable" status of common WebSocket
/// servers; the keep-alive loop closes with it and the close event carries it.
pub const KEEPALIVE_TIMEOUT_CODE: u16 = 4500;

/// Status code reported when the peer sent a Close frame without a payload.
pub const NO_STATUS_CODE: u16 = 1005;

/// Status code reported when the connection dropped without any Close frame.
pub const ABNORMAL_CLOSURE_CODE: u16 = 1006;

/// A close event as reported by the transport: status code plus reason text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    /// Numeric status code (1000 = normal).
    pub code: u16,
    /// Reason text supplied by the peer or synthesised by the transport.
    ///
    /// May be empty.  Forwarded verbatim to the session registry.
    pub reason: String,
}

impl CloseStatus {
    /// Builds a close status from any code and reason.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// `1000`, empty reason.
    pub fn normal() -> Self {
        Self::new(1000, "")
    }

    /// `1005`: the peer closed without telling us why.
    pub fn no_status() -> Self {
        Self::new(NO_STATUS_CODE, "")
    }

    /// `1006`: the connection vanished without a closing handshake.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(ABNORMAL_CLOSURE_CODE, reason)
    }

    /// `4500`: the keep-alive loop saw no traffic within the timeout.
    pub fn keepalive_timeout() -> Self {
        Self::new(KEEPALIVE_TIMEOUT_CODE, "keep-alive timeout")
    }

    /// The observability category for this status.
    pub fn category(&self) -> CloseCategory {
        classify(self.code)
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {}, reason '{}')", self.category(), self.code, self.reason)
    }
}

/// Closed set of close-status categories used in log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCategory {
    Normal,
    GoingAway,
    ProtocolError,
    NotAcceptable,
    NoStatusCode,
    /// No Close frame was received (network drop, crashed peer).
    Abnormal,
    BadData,
    PolicyViolation,
    TooBigToProcess,
    RequiredExtension,
    ServerError,
    ServiceRestarted,
    ServiceOverload,
    TlsHandshakeFailure,
    /// Keep-alive expired; the session is not reliable any more.
    Timeout,
    /// Any code not listed above.
    Unclassified,
}

impl CloseCategory {
    /// Short snake_case label written to the logs.
    pub fn as_str(self) -> &'static str {
        match self {
            CloseCategory::Normal => "normal",
            CloseCategory::GoingAway => "going_away",
            CloseCategory::ProtocolError => "protocol_error",
            CloseCategory::NotAcceptable => "not_acceptable",
            CloseCategory::NoStatusCode => "no_status_code",
            CloseCategory::Abnormal => "abnormal",
            CloseCategory::BadData => "bad_data",
            CloseCategory::PolicyViolation => "policy_violation",
            CloseCategory::TooBigToProcess => "too_big_to_process",
            CloseCategory::RequiredExtension => "required_extension",
            CloseCategory::ServerError => "server_error",
            CloseCategory::ServiceRestarted => "service_restarted",
            CloseCategory::ServiceOverload => "service_overload",
            CloseCategory::TlsHandshakeFailure => "tls_handshake_failure",
            CloseCategory::Timeout => "timeout",
            CloseCategory::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for CloseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a close status code to its category.
///
/// Pure lookup; unknown codes fall back to [`CloseCategory::Unclassified`].
///
/// # Example
///
/// ```rust
/// use wsrpc_core::protocol::close::{classify, CloseCategory};
///
/// assert_eq!(classify(1006), CloseCategory::Abnormal);
/// assert_eq!(classify(3999), CloseCategory::Unclassified);
/// ```
pub fn classify(code: u16) -> CloseCategory {
    match code {
        1000 => CloseCategory::Normal,
        1001 => CloseCategory::GoingAway,
        1002 => CloseCategory::ProtocolError,
        1003 => CloseCategory::NotAcceptable,
        NO_STATUS_CODE => CloseCategory::NoStatusCode,
        ABNORMAL_CLOSURE_CODE => CloseCategory::Abnormal,
        1007 => CloseCategory::BadData,
        1008 => CloseCategory::PolicyViolation,
        1009 => CloseCategory::TooBigToProcess,
        1010 => CloseCategory::RequiredExtension,
        1011 => CloseCategory::ServerError,
        1012 => CloseCategory::ServiceRestarted,
        1013 => CloseCategory::ServiceOverload,
        1015 => CloseCategory::TlsHandshakeFailure,
        KEEPALIVE_TIMEOUT_CODE => CloseCategory::Timeout,
        _ => CloseCategory::Unclassified,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_every_documented_code() {
        // Arrange: the full table, code → expected category
        let table = [
            (1000, CloseCategory::Normal),
            (1001, CloseCategory::GoingAway),
            (1002, CloseCategory::ProtocolError),
            (1003, CloseCategory::NotAcceptable),
            (1005, CloseCategory::NoStatusCode),
            (1006, CloseCategory::Abnormal),
            (1007, CloseCategory::BadData),
            (1008, CloseCategory::PolicyViolation),
            (1009, CloseCategory::TooBigToProcess),
            (1010, CloseCategory::RequiredExtension),
            (1011, CloseCategory::ServerError),
            (1012, CloseCategory::ServiceRestarted),
            (1013, CloseCategory::ServiceOverload),
            (1015, CloseCategory::TlsHandshakeFailure),
            (4500, CloseCategory::Timeout),
        ];

        // Act / Assert
        for (code, expected) in table {
            assert_eq!(classify(code), expected, "code {code}");
        }
    }

    #[test]
    fn test_classify_unknown_codes_fall_back_to_unclassified() {
        for code in [0, 999, 1004, 1014, 1016, 2000, 3000, 4000, 4999, u16::MAX] {
            assert_eq!(classify(code), CloseCategory::Unclassified, "code {code}");
        }
    }

    #[test]
    fn test_category_labels_are_unique() {
        let all = [
            CloseCategory::Normal,
            CloseCategory::GoingAway,
            CloseCategory::ProtocolError,
            CloseCategory::NotAcceptable,
            CloseCategory::NoStatusCode,
            CloseCategory::Abnormal,
            CloseCategory::BadData,
            CloseCategory::PolicyViolation,
            CloseCategory::TooBigToProcess,
            CloseCategory::RequiredExtension,
            CloseCategory::ServerError,
            CloseCategory::ServiceRestarted,
            CloseCategory::ServiceOverload,
            CloseCategory::TlsHandshakeFailure,
            CloseCategory::Timeout,
            CloseCategory::Unclassified,
        ];
        let labels: std::collections::HashSet<_> = all.iter().map(|c| c.as_str()).collect();
        assert_eq!(labels.len(), all.len());
    }

    #[test]
    fn test_keepalive_timeout_status_is_classified_as_timeout() {
        let status = CloseStatus::keepalive_timeout();
        assert_eq!(status.category(), CloseCategory::Timeout);
        assert_eq!(status.reason, "keep-alive timeout");
    }

    #[test]
    fn test_display_includes_category_code_and_reason() {
        let status = CloseStatus::abnormal("connection reset");
        assert_eq!(
            status.to_string(),
            "abnormal (code 1006, reason 'connection reset')"
        );
    }

    #[test]
    fn test_no_status_has_empty_reason() {
        let status = CloseStatus::no_status();
        assert_eq!(status.code, 1005);
        assert!(status.reason.is_empty());
    }
}
