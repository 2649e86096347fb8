//! Error types for wsprobe
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - Classification of transport failures into reconnect categories
//! - User-friendly messages with suggestions
//! - Exit codes for CLI

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

/// Result type alias for probe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Close code reported when the server sent a Close frame without a status
pub const CLOSE_CODE_NO_STATUS: u16 = 1005;

/// Close code reported when the stream ended without any Close frame
pub const CLOSE_CODE_ABNORMAL: u16 = 1006;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,

    // Connection errors (3xx)
    ConnectionTimeout = 301,
    ConnectionRefused = 302,
    ConnectionLost = 303,
    ConnectionClosed = 304,
    HeartbeatFailed = 305,

    // Protocol errors (4xx)
    HandshakeRejected = 400,
    ProtocolUnexpected = 402,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            900..=999 => 90,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the probe
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────

    /// The HTTP upgrade was answered with a non-101 status
    #[error("Handshake rejected by {url} with HTTP {status}")]
    HandshakeRejected { url: String, status: u16 },

    /// Nothing is listening on the endpoint
    #[error("Connection to {url} refused")]
    ConnectionRefused { url: String },

    /// The opening handshake did not finish in time
    #[error("Connection to {url} timed out after {timeout_ms}ms")]
    ConnectionTimeout { url: String, timeout_ms: u64 },

    /// Transport-level failure (reset, unreachable, TLS, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// The server closed the connection
    #[error("Connection closed: {code} {reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// A liveness probe could not be sent or was not answered
    #[error("Heartbeat failed: {message}")]
    HeartbeatFailed { message: String },

    /// Anything the transport reports that fits no other category
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Classify a transport error raised while talking to `url`
    pub fn from_transport(url: &str, err: WsError) -> Self {
        match err {
            WsError::Http(response) => Error::HandshakeRejected {
                url: url.to_string(),
                status: response.status().as_u16(),
            },
            WsError::Io(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                Error::ConnectionRefused {
                    url: url.to_string(),
                }
            }
            WsError::Io(e) => Error::Network(e.to_string()),
            WsError::Tls(e) => Error::Network(e.to_string()),
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                Error::Network("connection already closed".to_string())
            }
            other => Error::Unexpected(other.to_string()),
        }
    }

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Toml(_) => ErrorCode::ConfigParseError,

            Error::HandshakeRejected { .. } => ErrorCode::HandshakeRejected,
            Error::ConnectionRefused { .. } => ErrorCode::ConnectionRefused,
            Error::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,
            Error::Network(_) => ErrorCode::ConnectionLost,
            Error::ConnectionClosed { .. } => ErrorCode::ConnectionClosed,
            Error::HeartbeatFailed { .. } => ErrorCode::HeartbeatFailed,
            Error::Unexpected(_) => ErrorCode::ProtocolUnexpected,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the reconnect loop recovers from this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::HandshakeRejected { .. }
                | Error::ConnectionRefused { .. }
                | Error::ConnectionTimeout { .. }
                | Error::Network(_)
                | Error::ConnectionClosed { .. }
                | Error::HeartbeatFailed { .. }
                | Error::Unexpected(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    /// Category-specific line written to the journal when a connection ends
    pub fn journal_line(&self) -> String {
        match self {
            Error::HandshakeRejected { status, .. } => {
                format!("ERROR: Connection failed with HTTP {}", status)
            }
            Error::ConnectionRefused { .. } => "ERROR: Connection refused".to_string(),
            Error::ConnectionTimeout { timeout_ms, .. } => format!(
                "ERROR: Network error - handshake timed out after {}ms",
                timeout_ms
            ),
            Error::Network(message) => format!("ERROR: Network error - {}", message),
            Error::ConnectionClosed { code, reason } => {
                format!("DISCONNECTED: closed by server ({} {})", code, reason)
            }
            Error::HeartbeatFailed { message } => format!("ERROR: Heartbeat failed - {}", message),
            Error::Unexpected(message) => format!("ERROR: Unexpected error - {}", message),
            other => format!("ERROR: Unexpected error - {}", other),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => {
                Some("Run 'wsprobe config init' to create a default configuration file.")
            }
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'wsprobe config validate' to see details.",
            ),
            Error::ConfigValidation { .. } => {
                Some("Review the configuration file and fix the invalid values.")
            }
            Error::IoWrite { .. } => {
                Some("Check that the journal directory exists and is writable.")
            }
            Error::HandshakeRejected { .. } => {
                Some("The endpoint answered but refused the upgrade. Check the URL path.")
            }
            Error::ConnectionRefused { .. } => {
                Some("Nothing is listening on that host and port. Is the server running?")
            }
            Error::ConnectionTimeout { .. } => {
                Some("The endpoint may be down or filtered. Check your firewall settings.")
            }
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!("\x1b[31mError [{}]\x1b[0m: {}\n", self.code(), self);

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn heartbeat_failed(message: impl Into<String>) -> Self {
        Error::HeartbeatFailed {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::http::Response;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::ConfigNotFound.as_str(), "E100");
        assert_eq!(ErrorCode::ConnectionRefused.as_str(), "E302");
        assert_eq!(ErrorCode::InternalError.as_str(), "E900");
    }

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(ErrorCode::ConfigValidation.exit_code(), 10);
        assert_eq!(ErrorCode::IoWrite.exit_code(), 20);
        assert_eq!(ErrorCode::ConnectionRefused.exit_code(), 30);
        assert_eq!(ErrorCode::HandshakeRejected.exit_code(), 40);
        assert_eq!(ErrorCode::InternalError.exit_code(), 90);
    }

    #[test]
    fn test_classify_refused() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::from_transport("ws://127.0.0.1:1/ws", WsError::Io(io_err));
        assert!(matches!(err, Error::ConnectionRefused { .. }));
        assert_eq!(err.journal_line(), "ERROR: Connection refused");
    }

    #[test]
    fn test_classify_other_io_as_network() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err = Error::from_transport("ws://host/ws", WsError::Io(io_err));
        assert!(matches!(err, Error::Network(_)));
        assert_eq!(err.journal_line(), "ERROR: Network error - reset by peer");
    }

    #[test]
    fn test_classify_http_status() {
        let response = Response::builder().status(403).body(None).unwrap();
        let err = Error::from_transport("ws://host/ws", WsError::Http(response));
        assert!(matches!(err, Error::HandshakeRejected { status: 403, .. }));
        assert_eq!(err.journal_line(), "ERROR: Connection failed with HTTP 403");
    }

    #[test]
    fn test_classify_unexpected() {
        let err = Error::from_transport("ws://host/ws", WsError::Utf8);
        assert!(matches!(err, Error::Unexpected(_)));
        assert!(err.journal_line().starts_with("ERROR: Unexpected error - "));
    }

    #[test]
    fn test_closed_journal_line() {
        let err = Error::ConnectionClosed {
            code: 1000,
            reason: "bye".to_string(),
        };
        assert_eq!(err.journal_line(), "DISCONNECTED: closed by server (1000 bye)");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_config_errors_not_retryable() {
        assert!(!Error::config_validation("bad").is_retryable());
        assert!(Error::heartbeat_failed("timeout").is_retryable());
    }

    #[test]
    fn test_format_for_terminal() {
        let err = Error::ConfigNotFound {
            path: PathBuf::from("/test/wsprobe.toml"),
        };
        let formatted = err.format_for_terminal();
        assert!(formatted.contains("E100"));
        assert!(formatted.contains("\x1b[31m"));
        assert!(formatted.contains("Hint"));
    }

    #[test]
    fn test_format_for_log() {
        let err = Error::config_field_invalid("endpoint.url", "must start with ws://");
        let formatted = err.format_for_log();
        assert!(formatted.contains("[E102]"));
        assert!(!formatted.contains("\x1b["));
    }
}
