//! Non-blocking transport for the Socketeer engine.
//!
//! A [`Transport`] owns every socket of one server or client: the
//! listening socket, accepted or connected streams (optionally TLS), or the
//! single UDP socket. Each lives in the registry as a [`Connection`] keyed
//! by [`ConnectionId`]. Nothing here blocks for longer than the timeout
//! handed to [`Transport::poll_readable`] or the configured connect timeout.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use socketeer_config::EngineConfig;
//! use socketeer_net::{ReadOutcome, Transport};
//!
//! # fn main() -> Result<(), socketeer_net::NetError> {
//! let mut transport = Transport::listen(&EngineConfig::new("tcp://0.0.0.0:9000"))?;
//! loop {
//!     while let Some(id) = transport.accept()? {
//!         println!("accepted {id}");
//!     }
//!     for id in transport.poll_readable(Duration::from_millis(1))? {
//!         if let ReadOutcome::Data(bytes) = transport.read(id)? {
//!             transport.write(id, &bytes)?;
//!         }
//!     }
//! }
//! # }
//! ```

#![warn(missing_docs)]

mod connection;
mod error;
mod tls;
mod transport;

pub use connection::{Connection, ConnectionId, ConnectionKind, ReadOutcome};
pub use error::{NetError, NetResult};
pub use tls::TlsContext;
pub use transport::Transport;
