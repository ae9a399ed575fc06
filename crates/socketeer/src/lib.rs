//! # Socketeer
//!
//! An embeddable socket engine: TCP, UDP, TLS and WebSocket servers and
//! clients driven by a cooperative, single-thread scheduler.
//!
//! A host installs [`Callbacks`], then calls [`Server::listen`] or
//! [`Client::connect`]. That opens the transport and spawns one
//! long-running task per loop:
//!
//! - **accept**: takes new stream connections and greets them
//! - **message**: reads readable connections, completes WebSocket upgrades
//!   and delivers complete messages to `on_message`
//! - **heartbeat**: sends heartbeats to quiet connections and closes dead
//!   ones ([`liveness`])
//! - **send**: writes what `on_send` hands out, in order
//!
//! Each loop suspends after a bounded slice of work, so none can starve
//! the others, and no socket call blocks longer than the configured poll
//! timeout. Clients additionally run a reconnect supervisor governed by
//! [`ReconnectPolicy`].
//!
//! ```rust,no_run
//! use socketeer::prelude::*;
//!
//! # fn main() -> Result<(), EngineError> {
//! let config = EngineConfig::builder()
//!     .address("tcp://0.0.0.0:7000")
//!     .heartbeat_interval_secs(15)
//!     .build();
//!
//! let callbacks = Callbacks::new()
//!     .on_connect(|_| Ok(Some(Bytes::from_static(b"ready\n"))))
//!     .on_message(|id, message| {
//!         println!("{id}: {}", String::from_utf8_lossy(&message));
//!         Ok(())
//!     });
//!
//! Server::listen(config, callbacks)?.run();
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! - [`tasks`]: the cooperative scheduler
//! - [`ws`]: WebSocket handshake and framing
//! - [`net`]: non-blocking transport and connection registry
//! - [`config`]: configuration types and layered loading
//! - [`telemetry`]: logging setup and metrics

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod callbacks;
mod client;
mod dispatcher;
mod engine;
mod error;
pub mod liveness;
mod reader;
mod reconnect;
mod server;

pub use socketeer_config as config;
pub use socketeer_net as net;
pub use socketeer_tasks as tasks;
pub use socketeer_telemetry as telemetry;
pub use socketeer_ws as ws;

pub use bytes::Bytes;
pub use callbacks::Callbacks;
pub use client::Client;
pub use error::{ClientError, ClientResult, EngineError, EngineResult};
pub use liveness::{LivenessAction, DEAD_INTERVAL_MULTIPLIER};
pub use reconnect::{ReconnectDecision, ReconnectPolicy, RETRY_FOREVER};
pub use server::Server;
pub use socketeer_config::{ConfigLoader, EngineConfig};
pub use socketeer_net::ConnectionId;

/// Common imports for hosts.
pub mod prelude {
    pub use bytes::Bytes;

    pub use crate::callbacks::Callbacks;
    pub use crate::client::Client;
    pub use crate::error::{ClientError, ClientResult, EngineError, EngineResult};
    pub use crate::server::Server;
    pub use socketeer_config::{ConfigLoader, EngineConfig};
    pub use socketeer_net::ConnectionId;
    pub use socketeer_telemetry::{init_logging, LogConfig, LogFormat};
}
