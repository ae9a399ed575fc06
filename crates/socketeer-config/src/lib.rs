//! Typed configuration for the Socketeer engine.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! # Example
//!
//! ```no_run
//! use socketeer_config::ConfigLoader;
//!
//! # fn main() -> Result<(), socketeer_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("socketeer.toml")?
//!     .with_env_prefix("SOCKETEER")
//!     .load()?;
//!
//! println!("engine address: {}", config.endpoint()?);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! address = "wss://0.0.0.0:8443"
//! read_buffer_size = 8192
//! max_write_buffer = 4194304
//!
//! [tls]
//! certificate = "certs/server.pem"
//! private_key = "certs/server.key"
//! passphrase = "change-me"
//! allow_self_signed = true
//!
//! [timing]
//! poll_timeout_us = 1000
//! heartbeat_interval_secs = 30
//! connect_timeout_ms = 5000
//!
//! [heartbeat]
//! payload = "ping"
//!
//! [scheduler]
//! max_items_per_slice = 64
//!
//! [reconnect]
//! retry_count = -1
//! wait_seconds = 1
//! ```
//!
//! # Environment Variable Overrides
//!
//! - `SOCKETEER__ADDRESS=tcp://0.0.0.0:9000`
//! - `SOCKETEER__TIMING__HEARTBEAT_INTERVAL_SECS=10`
//! - `SOCKETEER__RECONNECT__RETRY_COUNT=-1`

#![warn(missing_docs)]

mod address;
mod config;
mod error;
mod loader;
mod schema;

pub use address::{Endpoint, Scheme};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use schema::*;
