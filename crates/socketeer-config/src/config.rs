//! Main configuration types.
//!
//! This module provides the top-level [`EngineConfig`] struct and its builder.

use serde::{Deserialize, Serialize};

use crate::address::Endpoint;
use crate::error::{ConfigError, ConfigResult};
use crate::{
    HeartbeatConfig, ReconnectConfig, SchedulerConfig, TimingConfig, TlsConfig, WebSocketSection,
};

/// Complete engine configuration.
///
/// The engine takes ownership of this value in `listen`/`connect`; it is
/// not modified afterwards. Use [`ConfigLoader`](crate::ConfigLoader) to
/// load it from files and environment variables.
///
/// # Example
///
/// ```
/// use socketeer_config::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.address, "tcp://127.0.0.1:9000");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Target address, `scheme://host:port`.
    #[serde(default = "default_address")]
    pub address: String,

    /// TLS options for `tls`, `ssl` and `wss` endpoints.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Poll, heartbeat and connect timing.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Default heartbeat payload.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Fairness bound for the cooperative loops.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Client reconnection policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// WebSocket limits.
    #[serde(default)]
    pub websocket: WebSocketSection,

    /// Bytes requested from the socket per read.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Unsent bytes a stream may hold before further writes are refused.
    #[serde(default = "default_max_write_buffer")]
    pub max_write_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            tls: TlsConfig::default(),
            timing: TimingConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            scheduler: SchedulerConfig::default(),
            reconnect: ReconnectConfig::default(),
            websocket: WebSocketSection::default(),
            read_buffer_size: default_read_buffer_size(),
            max_write_buffer: default_max_write_buffer(),
        }
    }
}

fn default_address() -> String {
    "tcp://127.0.0.1:9000".to_string()
}

fn default_read_buffer_size() -> usize {
    8192
}

fn default_max_write_buffer() -> usize {
    4 * 1024 * 1024
}

impl EngineConfig {
    /// Default configuration for the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Create a new configuration builder.
    ///
    /// # Example
    ///
    /// ```
    /// use socketeer_config::EngineConfig;
    ///
    /// let config = EngineConfig::builder()
    ///     .address("ws://0.0.0.0:8080")
    ///     .heartbeat_interval_secs(10)
    ///     .build();
    ///
    /// assert_eq!(config.timing.heartbeat_interval_secs, 10);
    /// ```
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Parse the configured address.
    pub fn endpoint(&self) -> ConfigResult<Endpoint> {
        Endpoint::parse(&self.address)
    }

    /// Validate the configuration for either side of a connection.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the address cannot be parsed
    /// - `scheduler.max_items_per_slice`, `read_buffer_size` or
    ///   `max_write_buffer` is zero
    /// - `reconnect.retry_count` is below `-1`
    pub fn validate(&self) -> ConfigResult<()> {
        self.endpoint()?;

        if self.scheduler.max_items_per_slice == 0 {
            return Err(ConfigError::invalid_value(
                "scheduler.max_items_per_slice",
                "must be at least 1",
            ));
        }

        if self.read_buffer_size == 0 {
            return Err(ConfigError::invalid_value(
                "read_buffer_size",
                "must be at least 1",
            ));
        }

        if self.max_write_buffer == 0 {
            return Err(ConfigError::invalid_value(
                "max_write_buffer",
                "must be at least 1",
            ));
        }

        if self.reconnect.retry_count < -1 {
            return Err(ConfigError::invalid_value(
                "reconnect.retry_count",
                "must be -1 (infinite), 0 (none) or a positive count",
            ));
        }

        Ok(())
    }

    /// Validate the configuration for a listening server.
    ///
    /// In addition to [`validate`](Self::validate), TLS endpoints must name
    /// a certificate.
    pub fn validate_server(&self) -> ConfigResult<()> {
        self.validate()?;
        let endpoint = self.endpoint()?;
        if endpoint.scheme.is_tls() && self.tls.certificate.is_none() {
            return Err(ConfigError::validation_error(format!(
                "tls.certificate must be set to listen on {}",
                endpoint.scheme
            )));
        }
        Ok(())
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the target address.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = address.into();
        self
    }

    /// Set the TLS options.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = tls;
        self
    }

    /// Set the readiness poll timeout in microseconds.
    #[must_use]
    pub fn poll_timeout_us(mut self, micros: u64) -> Self {
        self.config.timing.poll_timeout_us = micros;
        self
    }

    /// Set the heartbeat interval in seconds.
    #[must_use]
    pub fn heartbeat_interval_secs(mut self, secs: u64) -> Self {
        self.config.timing.heartbeat_interval_secs = secs;
        self
    }

    /// Set the client connect timeout in milliseconds.
    #[must_use]
    pub fn connect_timeout_ms(mut self, millis: u64) -> Self {
        self.config.timing.connect_timeout_ms = millis;
        self
    }

    /// Set the default heartbeat payload.
    #[must_use]
    pub fn heartbeat_payload(mut self, payload: impl Into<String>) -> Self {
        self.config.heartbeat.payload = payload.into();
        self
    }

    /// Set the fairness bound.
    #[must_use]
    pub fn max_items_per_slice(mut self, items: usize) -> Self {
        self.config.scheduler.max_items_per_slice = items;
        self
    }

    /// Set the reconnection policy.
    #[must_use]
    pub fn reconnect(mut self, retry_count: i64, wait_seconds: u64) -> Self {
        self.config.reconnect = ReconnectConfig {
            retry_count,
            wait_seconds,
        };
        self
    }

    /// Set the WebSocket limits.
    #[must_use]
    pub fn websocket(mut self, websocket: WebSocketSection) -> Self {
        self.config.websocket = websocket;
        self
    }

    /// Set the read buffer size.
    #[must_use]
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the per-connection cap on unsent bytes.
    #[must_use]
    pub fn max_write_buffer(mut self, size: usize) -> Self {
        self.config.max_write_buffer = size;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scheme;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.validate_server().is_ok());
        assert_eq!(config.endpoint().unwrap().scheme, Scheme::Tcp);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::builder()
            .address("udp://0.0.0.0:5000")
            .poll_timeout_us(500)
            .max_items_per_slice(8)
            .reconnect(-1, 2)
            .heartbeat_payload("hb")
            .build();

        assert_eq!(config.timing.poll_timeout_us, 500);
        assert_eq!(config.scheduler.max_items_per_slice, 8);
        assert_eq!(config.reconnect.retry_count, -1);
        assert_eq!(config.heartbeat.payload, "hb");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_address() {
        let config = EngineConfig::new("not-an-address");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_zero_slice_rejected() {
        let config = EngineConfig::builder().max_items_per_slice(0).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_count_below_minus_one_rejected() {
        let config = EngineConfig::builder().reconnect(-2, 1).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tls_server_requires_certificate() {
        let config = EngineConfig::new("wss://0.0.0.0:8443");
        assert!(config.validate().is_ok());
        assert!(config.validate_server().is_err());

        let config = EngineConfig::builder()
            .address("wss://0.0.0.0:8443")
            .tls(TlsConfig {
                certificate: Some("server.pem".into()),
                ..Default::default()
            })
            .build();
        assert!(config.validate_server().is_ok());
    }

    #[test]
    fn test_passphrase_accepted() {
        let config = EngineConfig::builder()
            .address("tls://0.0.0.0:8443")
            .tls(TlsConfig {
                certificate: Some("server.pem".into()),
                passphrase: Some("secret".into()),
                ..Default::default()
            })
            .build();
        assert!(config.validate_server().is_ok());
    }

    #[test]
    fn test_zero_write_buffer_rejected() {
        let config = EngineConfig::builder().max_write_buffer(0).build();
        assert!(config.validate().is_err());
        assert_eq!(EngineConfig::default().max_write_buffer, 4 * 1024 * 1024);
    }
}
