//! Observability for the Socketeer engine.
//!
//! - **Logging**: a `tracing-subscriber` setup with JSON or pretty output
//!   and an `EnvFilter`
//! - **Metrics**: connection, message and callback counters recorded through
//!   the `metrics` facade
//!
//! The engine never installs a subscriber or recorder on its own; both are
//! opt-in for the host.
//!
//! ```rust,no_run
//! use socketeer_telemetry::{init_logging, metrics, LogConfig};
//!
//! init_logging(&LogConfig::default()).unwrap();
//! metrics::describe_metrics();
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::CloseReason;

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
