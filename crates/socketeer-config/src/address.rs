//! `scheme://host:port[/path]` endpoint addresses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Transport scheme of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain TCP stream.
    Tcp,
    /// UDP datagrams on a single socket.
    Udp,
    /// TCP wrapped in TLS (`tls://` or `ssl://`).
    Tls,
    /// WebSocket over TCP.
    Ws,
    /// WebSocket over TLS.
    Wss,
}

impl Scheme {
    /// Check if the stream is wrapped in TLS.
    pub fn is_tls(self) -> bool {
        matches!(self, Self::Tls | Self::Wss)
    }

    /// Check if connections speak the WebSocket protocol.
    pub fn is_websocket(self) -> bool {
        matches!(self, Self::Ws | Self::Wss)
    }

    /// Check if this is the datagram transport.
    pub fn is_datagram(self) -> bool {
        matches!(self, Self::Udp)
    }

    /// Get the canonical scheme name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Tls => "tls",
            Self::Ws => "ws",
            Self::Wss => "wss",
        }
    }
}

impl FromStr for Scheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "tls" | "ssl" => Ok(Self::Tls),
            "ws" => Ok(Self::Ws),
            "wss" => Ok(Self::Wss),
            other => Err(ConfigError::invalid_address(
                s,
                format!("unknown scheme '{other}'"),
            )),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Transport scheme.
    pub scheme: Scheme,
    /// Host name or IP literal, without IPv6 brackets.
    pub host: String,
    /// Port number.
    pub port: u16,
    /// Request path for WebSocket clients (defaults to `/`).
    pub path: String,
}

impl Endpoint {
    /// Parse an address such as `ws://127.0.0.1:8080/chat`.
    pub fn parse(address: &str) -> ConfigResult<Self> {
        let (scheme, rest) = address
            .split_once("://")
            .ok_or_else(|| ConfigError::invalid_address(address, "expected scheme://host:port"))?;
        let scheme: Scheme = scheme
            .parse()
            .map_err(|_| {
                ConfigError::invalid_address(address, format!("unknown scheme '{scheme}'"))
            })?;

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| ConfigError::invalid_address(address, "unterminated IPv6 literal"))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| ConfigError::invalid_address(address, "missing port"))?;
            (host, port)
        } else {
            authority
                .rsplit_once(':')
                .ok_or_else(|| ConfigError::invalid_address(address, "missing port"))?
        };

        if host.is_empty() {
            return Err(ConfigError::invalid_address(address, "missing host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ConfigError::invalid_address(address, format!("invalid port '{port}'")))?;

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// The `host:port` pair to hand to socket APIs.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())?;
        if self.path != "/" {
            f.write_str(&self.path)?;
        }
        Ok(())
    }
}
