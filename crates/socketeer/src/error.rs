//! Engine and client error types.

use socketeer_config::ConfigError;
use socketeer_net::{ConnectionId, NetError};
use socketeer_tasks::TaskError;
use socketeer_ws::WsError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors raised by a server or client engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Opening, reading or writing a socket failed.
    #[error(transparent)]
    Net(#[from] NetError),

    /// A WebSocket frame could not be built or decoded.
    #[error(transparent)]
    Protocol(#[from] WsError),

    /// The connection has not finished its WebSocket upgrade.
    #[error("connection {0} has not completed its handshake")]
    HandshakePending(ConnectionId),

    /// The connection has no peer to address yet (UDP before the first datagram).
    #[error("connection {0} has no peer yet")]
    NoPeer(ConnectionId),

    /// The client has no open connection.
    #[error("not connected")]
    NotConnected,

    /// A loop task could not be collected.
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl EngineError {
    /// Check if the engine could not start at all.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::Net(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// Check if the error is confined to one connection.
    ///
    /// The engine closes that connection and keeps serving the rest.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Net(e) => e.is_recoverable(),
            Self::Protocol(_)
            | Self::HandshakePending(_)
            | Self::NoPeer(_)
            | Self::NotConnected => true,
            _ => false,
        }
    }

    /// Check if the failure came from the socket itself.
    ///
    /// Such connections are closed; encode failures and pending handshakes
    /// leave the connection open.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Net(NetError::Io(_) | NetError::Connect { .. }))
    }

    /// Check if the write was refused because the peer stopped reading.
    ///
    /// The connection stays open; the message can be retried later.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::Net(NetError::WriteBufferFull { .. }))
    }
}

/// Errors that end a client's run.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The engine could not be started.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The reconnection policy gave up.
    #[error("reconnection failed after {attempts} attempt(s)")]
    ReconnectExhausted {
        /// Reconnect attempts made since the last successful connection.
        attempts: u32,
    },
}

impl ClientError {
    /// Check if the reconnection policy gave up.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::ReconnectExhausted { .. })
    }
}

impl From<NetError> for ClientError {
    fn from(err: NetError) -> Self {
        Self::Engine(err.into())
    }
}

impl From<TaskError> for ClientError {
    fn from(err: TaskError) -> Self {
        Self::Engine(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_classification() {
        let io_err = EngineError::from(NetError::Io(io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(io_err.is_recoverable());
        assert!(io_err.is_transport());
        assert!(!io_err.is_fatal());

        let protocol = EngineError::from(WsError::UnmaskedFrame);
        assert!(protocol.is_recoverable());
        assert!(!protocol.is_transport());

        let config = EngineError::from(ConfigError::validation_error("bad"));
        assert!(config.is_fatal());
        assert!(!config.is_recoverable());

        let full = EngineError::from(NetError::WriteBufferFull {
            id: ConnectionId::new(),
            pending: 4096,
        });
        assert!(full.is_backpressure());
        assert!(full.is_recoverable());
        assert!(!full.is_transport());
    }

    #[test]
    fn test_exhausted_display() {
        let err = ClientError::ReconnectExhausted { attempts: 2 };
        assert!(err.is_exhausted());
        assert_eq!(err.to_string(), "reconnection failed after 2 attempt(s)");
    }
}
