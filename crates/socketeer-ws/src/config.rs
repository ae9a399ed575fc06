//! WebSocket codec limits.

/// Limits applied by a WebSocket session while decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Maximum reassembled message size in bytes (default: 64 MB).
    pub max_message_size: usize,
    /// Maximum single frame payload in bytes (default: 16 MB).
    pub max_frame_size: usize,
    /// Maximum size of the upgrade header block in bytes (default: 8 KB).
    pub max_handshake_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024 * 1024,
            max_frame_size: 16 * 1024 * 1024,
            max_handshake_size: 8 * 1024,
        }
    }
}

impl WebSocketConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum message size.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the maximum frame size.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the maximum handshake header size.
    pub fn max_handshake_size(mut self, size: usize) -> Self {
        self.max_handshake_size = size;
        self
    }
}
