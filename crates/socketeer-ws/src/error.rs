//! Error types for WebSocket framing and handshakes.
//!
//! Every variant here is a protocol error: the connection that produced it
//! must be closed. Incomplete input is not an error; decoders report it as
//! `Ok(None)`.

use thiserror::Error;

/// Result type for WebSocket codec operations.
pub type WsResult<T> = Result<T, WsError>;

/// Errors that can occur while decoding or encoding WebSocket traffic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WsError {
    /// The upgrade request or response could not be accepted.
    #[error("WebSocket handshake failed: {0}")]
    HandshakeFailed(String),

    /// A client frame arrived without the mask bit set.
    #[error("unmasked frame received from client")]
    UnmaskedFrame,

    /// The frame sequence violates the fragmentation rules.
    #[error("invalid opcode sequence: {0}")]
    InvalidSequence(String),

    /// A frame or reassembled message exceeds the configured limits.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge {
        /// Size of the offending payload.
        size: u64,
        /// Configured limit.
        limit: u64,
    },

    /// Any other violation of the framing rules.
    #[error("protocol error: {0}")]
    ProtocolError(String),
}

impl WsError {
    /// Create a new handshake failed error.
    pub fn handshake_failed(reason: impl Into<String>) -> Self {
        Self::HandshakeFailed(reason.into())
    }

    /// Create a new invalid sequence error.
    pub fn invalid_sequence(reason: impl Into<String>) -> Self {
        Self::InvalidSequence(reason.into())
    }

    /// Create a new protocol error.
    pub fn protocol_error(reason: impl Into<String>) -> Self {
        Self::ProtocolError(reason.into())
    }

    /// Check if this error happened before the upgrade completed.
    ///
    /// Server-side, such errors are answered with `406 Not Acceptable`.
    pub fn is_handshake(&self) -> bool {
        matches!(self, Self::HandshakeFailed(_))
    }
}
