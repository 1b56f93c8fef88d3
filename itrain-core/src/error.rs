//! Domain-specific error types for the iTrain gateway.
//!
//! All fallible operations return `Result<T, GatewayError>`.
//! A malformed peer never panics the process: every error is typed and
//! absorbed at the reactor boundary.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A frame did not begin with the `0xFF` start marker.
    #[error("invalid start marker: {0:#04x}")]
    InvalidStartMarker(u8),

    /// The trailing XOR byte did not match the computed checksum.
    #[error("checksum mismatch: frame carries {actual:#04x}, computed {expected:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// A message type byte is not part of the active dialect.
    #[error("unknown {dialect} message type: {value:#04x}")]
    UnknownMessage { dialect: &'static str, value: u8 },

    /// A request payload is shorter than its fixed record layout.
    #[error("{message} payload too short: expected {expected} bytes, got {actual}")]
    PayloadTooShort {
        message: &'static str,
        expected: usize,
        actual: usize,
    },

    // ── Frame Errors ─────────────────────────────────────────────
    /// The payload cannot be described by the 16-bit length field.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The header implies a frame longer than the receive buffer.
    #[error("frame too large: {size} bytes (buffer {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/UDP layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// The peer is not draining its outbound queue.
    #[error("outbound queue full")]
    QueueFull,

    // ── Collaborator Errors ──────────────────────────────────────
    /// The configuration bus did not answer within the deadline.
    #[error("rpc `{action}` timed out after {timeout:?}")]
    RpcTimeout {
        action: String,
        timeout: Duration,
    },

    /// The configuration bus rejected or failed the request.
    #[error("rpc failed: {0}")]
    Rpc(String),

    /// A response body lacked a field the handler needs.
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required device property is not cached yet.
    #[error("device property `{0}` is unknown")]
    MissingProperty(&'static str),

    // ── Application Errors ───────────────────────────────────────
    /// A control-channel line could not be parsed.
    #[error("invalid control command: {0}")]
    InvalidControl(String),

    /// An unknown protocol dialect name.
    #[error("unknown dialect: {0}")]
    UnknownDialect(String),

    /// A configuration value cannot be used.
    #[error("invalid config `{key}`: {reason}")]
    InvalidConfig { key: &'static str, reason: String },

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── DecodeError ───────────────────────────────────────────────────

/// Outcome of trying to cut one frame out of a byte slice.
///
/// `NeedMoreData` is not a failure: the caller keeps the bytes and waits
/// for the next read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The slice holds a frame prefix only.
    #[error("need more data: {needed} more bytes")]
    NeedMoreData { needed: usize },

    /// The slice cannot begin a valid frame.
    #[error("corrupt frame: {0}")]
    Corrupt(&'static str),
}

impl From<DecodeError> for GatewayError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::NeedMoreData { needed } => {
                GatewayError::Other(format!("incomplete frame, {needed} bytes missing"))
            }
            DecodeError::Corrupt(reason) => GatewayError::Other(format!("corrupt frame: {reason}")),
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for GatewayError {
    fn from(s: String) -> Self {
        GatewayError::Other(s)
    }
}

impl From<&str> for GatewayError {
    fn from(s: &str) -> Self {
        GatewayError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for GatewayError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        GatewayError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = GatewayError::ChecksumMismatch {
            expected: 0x08,
            actual: 0x09,
        };
        assert!(e.to_string().contains("0x08"));
        assert!(e.to_string().contains("0x09"));

        let e = GatewayError::FrameTooLarge {
            size: 2000,
            max: 1024,
        };
        assert!(e.to_string().contains("2000"));
        assert!(e.to_string().contains("1024"));
    }

    #[test]
    fn from_string() {
        let e: GatewayError = "something broke".into();
        assert!(matches!(e, GatewayError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: GatewayError = io_err.into();
        assert!(matches!(e, GatewayError::Connection(_)));
    }

    #[test]
    fn decode_error_converts() {
        let e: GatewayError = DecodeError::Corrupt("bad start").into();
        assert!(e.to_string().contains("bad start"));
    }
}
