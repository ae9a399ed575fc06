//! WebSocket opening handshake.
//!
//! The server side does not run a full HTTP parser: it waits for the
//! header block terminator and scans header lines for the two values it
//! needs. The client side builds the upgrade request and validates the
//! `101` response.

use base64::Engine;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::error::{WsError, WsResult};

/// The WebSocket magic GUID used in the handshake.
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Terminates the HTTP header block.
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Written to the peer when an upgrade is refused, then the connection closes.
pub const REJECTION_RESPONSE: &[u8] = b"Http/1.1 406 Not Acceptable\r\n\r\n";

/// The values a server needs from an upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// `Sec-WebSocket-Key` value.
    pub key: String,
    /// Raw `Sec-WebSocket-Protocol` value, if offered.
    pub protocol: Option<String>,
}

impl HandshakeRequest {
    /// The protocol the server echoes back: the last one offered.
    pub fn selected_protocol(&self) -> Option<&str> {
        self.protocol.as_deref().and_then(select_protocol)
    }
}

fn select_protocol(offered: &str) -> Option<&str> {
    offered
        .rsplit(',')
        .next()
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

/// Find the end of the header block, if it has arrived.
fn header_block_len(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

/// Look up a header value by name, ignoring ASCII case.
fn header_value<'a>(block: &'a str, name: &str) -> Option<&'a str> {
    block.split("\r\n").find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

/// Parse an upgrade request from the front of `buf`.
///
/// Returns `Ok(None)` until the full header block has arrived; otherwise
/// the extracted values and the number of bytes consumed.
pub fn parse_handshake(buf: &[u8]) -> WsResult<Option<(HandshakeRequest, usize)>> {
    let Some(len) = header_block_len(buf) else {
        return Ok(None);
    };

    let block = std::str::from_utf8(&buf[..len])
        .map_err(|_| WsError::handshake_failed("header block is not valid UTF-8"))?;

    let key = header_value(block, "Sec-WebSocket-Key")
        .filter(|k| !k.is_empty())
        .ok_or_else(|| WsError::handshake_failed("missing Sec-WebSocket-Key header"))?;

    let protocol = header_value(block, "Sec-WebSocket-Protocol")
        .filter(|p| !p.is_empty())
        .map(String::from);

    Ok(Some((
        HandshakeRequest {
            key: key.to_string(),
            protocol,
        },
        len,
    )))
}

/// Compute the Sec-WebSocket-Accept value from the key.
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    let result = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(result)
}

/// Build the `101 Switching Protocols` response.
///
/// If `protocol` is a comma separated list only the last entry is echoed.
pub fn build_handshake_response(key: &str, protocol: Option<&str>) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n",
        compute_accept_key(key)
    );
    if let Some(protocol) = protocol.and_then(select_protocol) {
        response.push_str("Sec-WebSocket-Protocol: ");
        response.push_str(protocol);
        response.push_str("\r\n");
    }
    response.push_str("\r\n");
    response.into_bytes()
}

/// Generate a random base64 `Sec-WebSocket-Key`.
pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    base64::engine::general_purpose::STANDARD.encode(nonce)
}

/// Build a client upgrade request.
pub fn build_client_request(host: &str, path: &str, key: &str, protocol: Option<&str>) -> Vec<u8> {
    let mut request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n"
    );
    if let Some(protocol) = protocol {
        request.push_str("Sec-WebSocket-Protocol: ");
        request.push_str(protocol);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");
    request.into_bytes()
}

/// Validate the server's answer to a client upgrade request.
///
/// Returns `Ok(None)` until the full header block has arrived, otherwise
/// the number of bytes consumed. Frames may follow in the same buffer.
pub fn validate_handshake_response(buf: &[u8], key: &str) -> WsResult<Option<usize>> {
    let Some(len) = header_block_len(buf) else {
        return Ok(None);
    };

    let block = std::str::from_utf8(&buf[..len])
        .map_err(|_| WsError::handshake_failed("response header is not valid UTF-8"))?;

    let status_line = block.lines().next().unwrap_or_default();
    let status = status_line.split_whitespace().nth(1);
    if status != Some("101") {
        debug!(status_line, "Upgrade refused by server");
        return Err(WsError::handshake_failed(format!(
            "unexpected status line: {status_line}"
        )));
    }

    let accept = header_value(block, "Sec-WebSocket-Accept")
        .ok_or_else(|| WsError::handshake_failed("missing Sec-WebSocket-Accept header"))?;
    if accept != compute_accept_key(key) {
        return Err(WsError::handshake_failed("Sec-WebSocket-Accept mismatch"));
    }

    Ok(Some(len))
}
