//! Configuration schema types.
//!
//! This module defines the structure of every configuration section.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// TLS options, applied once when the transport is opened.
///
/// # Example
///
/// ```
/// use socketeer_config::TlsConfig;
///
/// let tls = TlsConfig {
///     certificate: Some("certs/server.pem".into()),
///     private_key: Some("certs/server.key".into()),
///     ..Default::default()
/// };
/// assert!(tls.allow_self_signed);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// PEM certificate chain. Required for TLS servers.
    #[serde(default)]
    pub certificate: Option<PathBuf>,

    /// PEM private key. Defaults to the certificate file when unset.
    #[serde(default)]
    pub private_key: Option<PathBuf>,

    /// Passphrase of an encrypted private key.
    #[serde(default)]
    pub passphrase: Option<String>,

    /// Accept self-signed peer certificates.
    #[serde(default = "default_true")]
    pub allow_self_signed: bool,

    /// Name sent in SNI by TLS clients. Defaults to the endpoint host.
    #[serde(default)]
    pub server_name: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            certificate: None,
            private_key: None,
            passphrase: None,
            allow_self_signed: true,
            server_name: None,
        }
    }
}

impl TlsConfig {
    /// The file holding the private key.
    pub fn key_path(&self) -> Option<&PathBuf> {
        self.private_key.as_ref().or(self.certificate.as_ref())
    }
}

/// Timing knobs for the I/O loops.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TimingConfig {
    /// Readiness poll timeout in microseconds.
    #[serde(default = "default_poll_timeout_us")]
    pub poll_timeout_us: u64,

    /// Idle time before a heartbeat is sent, in seconds. Zero disables liveness.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Client connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_timeout_us: default_poll_timeout_us(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl TimingConfig {
    /// Readiness poll timeout.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_micros(self.poll_timeout_us)
    }

    /// Heartbeat interval, or `None` when liveness checks are off.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0)
            .then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }

    /// Client connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_poll_timeout_us() -> u64 {
    1_000
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

/// Heartbeat content for non-WebSocket connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatConfig {
    /// Payload written when no `onHeartbeat` callback overrides it.
    #[serde(default = "default_heartbeat_payload")]
    pub payload: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            payload: default_heartbeat_payload(),
        }
    }
}

fn default_heartbeat_payload() -> String {
    "ping".to_string()
}

/// Scheduler fairness settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Work items a loop processes before it suspends.
    #[serde(default = "default_max_items_per_slice")]
    pub max_items_per_slice: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_items_per_slice: default_max_items_per_slice(),
        }
    }
}

fn default_max_items_per_slice() -> usize {
    64
}

/// Client reconnection policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    /// `-1` retries forever, `0` never retries, `N` retries up to N times.
    #[serde(default = "default_retry_count")]
    pub retry_count: i64,

    /// Wait between attempts, in seconds.
    #[serde(default = "default_wait_seconds")]
    pub wait_seconds: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            wait_seconds: default_wait_seconds(),
        }
    }
}

impl ReconnectConfig {
    /// Wait between attempts.
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_seconds)
    }
}

fn default_retry_count() -> i64 {
    3
}

fn default_wait_seconds() -> u64 {
    1
}

/// WebSocket codec limits and client options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WebSocketSection {
    /// Maximum reassembled message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum single frame payload in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Maximum upgrade header block size in bytes.
    #[serde(default = "default_max_handshake_size")]
    pub max_handshake_size: usize,

    /// `Sec-WebSocket-Protocol` offered by clients.
    #[serde(default)]
    pub protocol: Option<String>,
}

impl Default for WebSocketSection {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_frame_size: default_max_frame_size(),
            max_handshake_size: default_max_handshake_size(),
            protocol: None,
        }
    }
}

fn default_max_message_size() -> usize {
    64 * 1024 * 1024
}

fn default_max_frame_size() -> usize {
    16 * 1024 * 1024
}

fn default_max_handshake_size() -> usize {
    8 * 1024
}

fn default_true() -> bool {
    true
}
