//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, and environment variables.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::{ConfigError, ConfigResult};
use crate::EngineConfig;

/// Configuration loader with layered approach.
///
/// The loader applies configuration in layers, with later layers overriding
/// earlier ones:
/// 1. Default values (built into the code)
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables
///
/// # Example
///
/// ```no_run
/// use socketeer_config::ConfigLoader;
///
/// # fn main() -> Result<(), socketeer_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_file("socketeer.toml")?
///     .with_env_prefix("SOCKETEER")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config: EngineConfig,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Create a new configuration loader seeded with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an explicit base configuration instead of the defaults.
    #[must_use]
    pub fn with_base(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Load configuration from a file.
    ///
    /// The format is chosen by extension: `.toml` or `.json`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file does not exist, cannot be read,
    /// or contains invalid or unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> ConfigResult<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        self.config = Self::parse_file(&content, path)?;
        Ok(self)
    }

    /// Load configuration from a file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> ConfigResult<Self> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in `"toml"` or `"json"` format.
    ///
    /// # Example
    ///
    /// ```
    /// use socketeer_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     address = "ws://127.0.0.1:8080"
    ///
    ///     [timing]
    ///     heartbeat_interval_secs = 5
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.timing.heartbeat_interval_secs, 5);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> ConfigResult<Self> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration format: {format}"
                )))
            }
        };
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Variables use the format `PREFIX__SECTION__KEY`, for example
    /// `SOCKETEER__TIMING__HEARTBEAT_INTERVAL_SECS=10` or
    /// `SOCKETEER__ADDRESS=tcp://0.0.0.0:7000`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment, if present.
    pub fn with_dotenv(self) -> ConfigResult<Self> {
        // a missing .env file is not an error
        let _ = dotenvy::dotenv();
        Ok(self)
    }

    /// Apply environment overrides, validate, and return the configuration.
    pub fn load(mut self) -> ConfigResult<EngineConfig> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Finalize without validation.
    #[must_use]
    pub fn load_unvalidated(self) -> EngineConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> ConfigResult<EngineConfig> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            ))),
        }
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> ConfigResult<()> {
        let mut vars: Vec<(String, String)> =
            env::vars().filter(|(k, _)| k.starts_with(prefix)).collect();
        vars.sort();

        for (key, value) in vars {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> ConfigResult<()> {
        let Some(rest) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            return Ok(());
        };
        let parts: Vec<&str> = rest.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            ["ADDRESS"] => config.address = value.to_string(),
            ["READ_BUFFER_SIZE"] => config.read_buffer_size = parse_num(key, value)?,
            ["MAX_WRITE_BUFFER"] => config.max_write_buffer = parse_num(key, value)?,

            ["TLS", "CERTIFICATE"] => config.tls.certificate = non_empty(value).map(Into::into),
            ["TLS", "PRIVATE_KEY"] => config.tls.private_key = non_empty(value).map(Into::into),
            ["TLS", "PASSPHRASE"] => config.tls.passphrase = non_empty(value).map(Into::into),
            ["TLS", "SERVER_NAME"] => config.tls.server_name = non_empty(value).map(Into::into),
            ["TLS", "ALLOW_SELF_SIGNED"] => {
                config.tls.allow_self_signed = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }

            ["TIMING", "POLL_TIMEOUT_US"] => config.timing.poll_timeout_us = parse_num(key, value)?,
            ["TIMING", "HEARTBEAT_INTERVAL_SECS"] => {
                config.timing.heartbeat_interval_secs = parse_num(key, value)?;
            }
            ["TIMING", "CONNECT_TIMEOUT_MS"] => {
                config.timing.connect_timeout_ms = parse_num(key, value)?;
            }

            ["HEARTBEAT", "PAYLOAD"] => config.heartbeat.payload = value.to_string(),

            ["SCHEDULER", "MAX_ITEMS_PER_SLICE"] => {
                config.scheduler.max_items_per_slice = parse_num(key, value)?;
            }

            ["RECONNECT", "RETRY_COUNT"] => config.reconnect.retry_count = parse_num(key, value)?,
            ["RECONNECT", "WAIT_SECONDS"] => config.reconnect.wait_seconds = parse_num(key, value)?,

            ["WEBSOCKET", "MAX_MESSAGE_SIZE"] => {
                config.websocket.max_message_size = parse_num(key, value)?;
            }
            ["WEBSOCKET", "MAX_FRAME_SIZE"] => {
                config.websocket.max_frame_size = parse_num(key, value)?;
            }
            ["WEBSOCKET", "MAX_HANDSHAKE_SIZE"] => {
                config.websocket.max_handshake_size = parse_num(key, value)?;
            }
            ["WEBSOCKET", "PROTOCOL"] => {
                config.websocket.protocol = non_empty(value).map(Into::into);
            }

            // Unknown keys are ignored
            _ => {}
        }

        Ok(())
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
