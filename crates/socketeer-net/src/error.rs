//! Transport error types.

use std::io;

use socketeer_config::ConfigError;
use thiserror::Error;

use crate::connection::ConnectionId;

/// Result type for transport operations.
pub type NetResult<T> = Result<T, NetError>;

/// Errors raised by the transport layer.
#[derive(Debug, Error)]
pub enum NetError {
    /// The configuration could not be used.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The address did not resolve to any socket address.
    #[error("could not resolve {0}")]
    Resolve(String),

    /// Binding the listening socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Connecting to the remote endpoint failed or timed out.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address we tried to reach.
        addr: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Certificate, key or session setup failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The identifier is not in the registry.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The operation does not apply to this kind of connection.
    #[error("unsupported operation on {id}: {reason}")]
    Unsupported {
        /// Connection the operation targeted.
        id: ConnectionId,
        /// What was attempted.
        reason: &'static str,
    },

    /// The peer is not draining its stream fast enough; the write was refused.
    #[error("write buffer of {id} is full ({pending} bytes unsent)")]
    WriteBufferFull {
        /// Connection the write targeted.
        id: ConnectionId,
        /// Bytes still waiting to go out.
        pending: usize,
    },

    /// A read or write on an open socket failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl NetError {
    /// Create a new TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Check if the error concerns a single connection.
    ///
    /// Recoverable errors close the affected connection; the engine keeps
    /// serving the others.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::UnknownConnection(_)
                | Self::Unsupported { .. }
                | Self::WriteBufferFull { .. }
        )
    }

    /// Check if the transport could not be opened at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Resolve(_) | Self::Bind { .. } | Self::Tls(_)
        )
    }
}

/// Converts a rustls error into an I/O error on the affected stream.
pub(crate) fn tls_io_error(err: rustls::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let io_err = NetError::Io(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(io_err.is_recoverable());
        assert!(!io_err.is_fatal());

        let bind = NetError::Bind {
            addr: "0.0.0.0:1".into(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(bind.is_fatal());
        assert!(!bind.is_recoverable());

        assert!(NetError::tls("bad key").is_fatal());
    }

    #[test]
    fn test_connect_is_neither() {
        // Connect failures belong to the reconnection policy.
        let err = NetError::Connect {
            addr: "127.0.0.1:1".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(!err.is_fatal());
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("127.0.0.1:1"));
    }
}
