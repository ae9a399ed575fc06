//! Per-connection WebSocket state.
//!
//! A [`WsSession`] owns the inbound byte buffer of one connection, its
//! handshake state and the fragment buffer used while continuation frames
//! accumulate. It performs no I/O: the transport feeds it bytes and writes
//! whatever it returns.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::config::WebSocketConfig;
use crate::error::{WsError, WsResult};
use crate::frame::{self, Opcode};
use crate::handshake::{self, HandshakeRequest};

/// Which end of the connection this session speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepted connection: expects masked frames, sends unmasked ones.
    Server,
    /// Outbound connection: masks every frame it sends.
    Client,
}

/// Upgrade progress of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// The connection does not speak WebSocket.
    NotApplicable,
    /// The upgrade request (server) or response (client) has not been
    /// processed yet.
    Pending,
    /// Frames may flow.
    Complete,
}

impl HandshakeState {
    /// Check if outbound messages must wait for the upgrade.
    pub fn blocks_send(self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// A data message whose final fragment has not arrived.
#[derive(Debug, Clone)]
pub struct FragmentBuffer {
    /// Opcode of the first fragment.
    pub opcode: Opcode,
    /// Mask key of the first fragment.
    pub mask: Option<[u8; 4]>,
    /// Unmasked payload collected so far.
    pub payload: BytesMut,
}

/// Outcome of decoding one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    /// A complete application message.
    Message {
        /// Opcode of the (first) frame.
        opcode: Opcode,
        /// Unmasked, reassembled payload.
        payload: Bytes,
    },
    /// A fragment was buffered; no application message yet.
    AwaitingContinuation,
    /// The peer sent a ping. The caller answers with [`WsSession::pong_frame`].
    Ping(Bytes),
    /// The peer answered a ping.
    Pong,
    /// The peer asked to close the connection.
    Close,
    /// A reserved opcode was received and dropped.
    Ignored(u8),
}

impl WsEvent {
    /// Check if this event carries an application message.
    pub fn is_message(&self) -> bool {
        matches!(self, Self::Message { .. })
    }
}

/// WebSocket state for one connection.
#[derive(Debug)]
pub struct WsSession {
    role: Role,
    handshake: HandshakeState,
    fragments: Option<FragmentBuffer>,
    inbound: BytesMut,
    client_key: Option<String>,
    config: WebSocketConfig,
}

impl WsSession {
    /// Create the session for an accepted connection.
    pub fn server(config: WebSocketConfig) -> Self {
        Self {
            role: Role::Server,
            handshake: HandshakeState::Pending,
            fragments: None,
            inbound: BytesMut::new(),
            client_key: None,
            config,
        }
    }

    /// Create the session for an outbound connection with a fresh key.
    pub fn client(config: WebSocketConfig) -> Self {
        Self {
            role: Role::Client,
            handshake: HandshakeState::Pending,
            fragments: None,
            inbound: BytesMut::new(),
            client_key: Some(handshake::generate_key()),
            config,
        }
    }

    /// Get the session role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Get the handshake state.
    pub fn handshake_state(&self) -> HandshakeState {
        self.handshake
    }

    /// Check if frames may flow.
    pub fn is_open(&self) -> bool {
        self.handshake == HandshakeState::Complete
    }

    /// Get the buffered fragments of an unfinished message, if any.
    pub fn fragments(&self) -> Option<&FragmentBuffer> {
        self.fragments.as_ref()
    }

    /// Number of bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.inbound.len()
    }

    /// Append bytes read from the transport.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
    }

    /// Server side: take the upgrade request once its header block is in.
    ///
    /// Bytes after the header block stay buffered as frame data.
    pub fn take_handshake_request(&mut self) -> WsResult<Option<HandshakeRequest>> {
        if self.role != Role::Server || self.handshake != HandshakeState::Pending {
            return Ok(None);
        }
        match handshake::parse_handshake(&self.inbound)? {
            Some((request, used)) => {
                self.inbound.advance(used);
                Ok(Some(request))
            }
            None => {
                self.check_handshake_size()?;
                Ok(None)
            }
        }
    }

    /// Server side: mark the upgrade accepted and build the `101` response.
    pub fn complete_handshake(&mut self, request: &HandshakeRequest) -> Vec<u8> {
        self.handshake = HandshakeState::Complete;
        debug!(protocol = ?request.selected_protocol(), "WebSocket upgrade accepted");
        handshake::build_handshake_response(&request.key, request.protocol.as_deref())
    }

    /// Client side: the upgrade request to send right after connecting.
    pub fn client_request(
        &self,
        host: &str,
        path: &str,
        protocol: Option<&str>,
    ) -> Option<Vec<u8>> {
        self.client_key
            .as_deref()
            .map(|key| handshake::build_client_request(host, path, key, protocol))
    }

    /// Client side: consume and validate the server's upgrade response.
    ///
    /// Returns `Ok(true)` once the handshake is complete.
    pub fn take_handshake_response(&mut self) -> WsResult<bool> {
        if self.handshake == HandshakeState::Complete {
            return Ok(true);
        }
        let Some(key) = self.client_key.as_deref() else {
            return Ok(false);
        };
        match handshake::validate_handshake_response(&self.inbound, key)? {
            Some(used) => {
                self.inbound.advance(used);
                self.handshake = HandshakeState::Complete;
                debug!("WebSocket upgrade confirmed by server");
                Ok(true)
            }
            None => {
                self.check_handshake_size()?;
                Ok(false)
            }
        }
    }

    fn check_handshake_size(&self) -> WsResult<()> {
        let limit = self.config.max_handshake_size;
        if self.inbound.len() > limit {
            return Err(WsError::handshake_failed(format!(
                "header block exceeds {limit} bytes"
            )));
        }
        Ok(())
    }

    /// Decode the next frame from the inbound buffer.
    ///
    /// Returns `Ok(None)` when no complete frame is buffered. Errors are
    /// protocol violations; the caller closes the connection.
    pub fn next_event(&mut self) -> WsResult<Option<WsEvent>> {
        if !self.is_open() {
            return Ok(None);
        }

        let Some(header) = frame::parse_header(&self.inbound)? else {
            return Ok(None);
        };
        let frame_limit = self.config.max_frame_size as u64;
        if header.payload_len > frame_limit {
            return Err(WsError::TooLarge {
                size: header.payload_len,
                limit: frame_limit,
            });
        }
        if self.role == Role::Server && header.mask.is_none() {
            return Err(WsError::UnmaskedFrame);
        }

        let Some((frame, used)) = frame::decode_frame(&self.inbound)? else {
            return Ok(None);
        };
        self.inbound.advance(used);
        trace!(opcode = ?frame.opcode, fin = frame.fin, len = frame.payload.len(), "Decoded frame");

        let event = match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if self.fragments.is_some() {
                    return Err(WsError::invalid_sequence(
                        "new data frame while a fragmented message is open",
                    ));
                }
                if frame.fin {
                    WsEvent::Message {
                        opcode: frame.opcode,
                        payload: frame.payload,
                    }
                } else {
                    self.fragments = Some(FragmentBuffer {
                        opcode: frame.opcode,
                        mask: frame.mask,
                        payload: BytesMut::from(&frame.payload[..]),
                    });
                    WsEvent::AwaitingContinuation
                }
            }
            Opcode::Continuation => {
                let Some(buffer) = self.fragments.as_mut() else {
                    return Err(WsError::invalid_sequence(
                        "continuation frame without a started message",
                    ));
                };
                let size = buffer.payload.len() + frame.payload.len();
                if size > self.config.max_message_size {
                    return Err(WsError::TooLarge {
                        size: size as u64,
                        limit: self.config.max_message_size as u64,
                    });
                }
                buffer.payload.extend_from_slice(&frame.payload);
                if frame.fin {
                    match self.fragments.take() {
                        Some(done) => WsEvent::Message {
                            opcode: done.opcode,
                            payload: done.payload.freeze(),
                        },
                        None => WsEvent::AwaitingContinuation,
                    }
                } else {
                    WsEvent::AwaitingContinuation
                }
            }
            Opcode::Close => WsEvent::Close,
            Opcode::Ping => WsEvent::Ping(frame.payload),
            Opcode::Pong => WsEvent::Pong,
            Opcode::Reserved(value) => WsEvent::Ignored(value),
        };
        Ok(Some(event))
    }

    fn outbound_mask(&self) -> Option<[u8; 4]> {
        match self.role {
            Role::Server => None,
            Role::Client => Some(rand::random()),
        }
    }

    /// Encode an application message for this end of the connection.
    pub fn encode_outbound(&self, payload: &[u8]) -> WsResult<Vec<u8>> {
        match self.role {
            Role::Server => frame::encode(payload),
            Role::Client => frame::encode_frame(Opcode::Text, payload, true, self.outbound_mask()),
        }
    }

    /// Zero-length pong, the answer to every ping.
    pub fn pong_frame(&self) -> WsResult<Vec<u8>> {
        frame::encode_frame(Opcode::Pong, &[], true, self.outbound_mask())
    }

    /// Zero-length ping, used as the WebSocket heartbeat.
    pub fn ping_frame(&self) -> WsResult<Vec<u8>> {
        frame::encode_frame(Opcode::Ping, &[], true, self.outbound_mask())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode_frame, encode_frame};

    const MASK: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

    fn open_server() -> WsSession {
        let mut session = WsSession::server(WebSocketConfig::default());
        session.feed(
            b"GET / HTTP/1.1\r\nHost: a\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        );
        let request = session.take_handshake_request().unwrap().unwrap();
        session.complete_handshake(&request);
        session
    }

    fn client_frame(opcode: Opcode, payload: &[u8], fin: bool) -> Vec<u8> {
        encode_frame(opcode, payload, fin, Some(MASK)).unwrap()
    }

    #[test]
    fn test_server_handshake_flow() {
        let mut session = WsSession::server(WebSocketConfig::default());
        assert_eq!(session.handshake_state(), HandshakeState::Pending);
        session.feed(b"GET / HTTP/1.1\r\nSec-WebSocket-Key: abc\r\n");
        assert!(session.take_handshake_request().unwrap().is_none());

        session.feed(b"\r\n");
        let request = session.take_handshake_request().unwrap().unwrap();
        assert_eq!(request.key, "abc");

        let response = session.complete_handshake(&request);
        assert!(response.starts_with(b"HTTP/1.1 101"));
        assert!(session.is_open());
        assert_eq!(session.buffered(), 0);
    }

    #[test]
    fn test_oversized_handshake_rejected() {
        let config = WebSocketConfig::new().max_handshake_size(16);
        let mut session = WsSession::server(config);
        session.feed(&[b'x'; 32]);
        assert!(session.take_handshake_request().unwrap_err().is_handshake());
    }

    #[test]
    fn test_no_frames_before_handshake() {
        let mut session = WsSession::server(WebSocketConfig::default());
        session.feed(&client_frame(Opcode::Text, b"early", true));
        assert_eq!(session.next_event().unwrap(), None);
    }

    #[test]
    fn test_single_frame_message() {
        let mut session = open_server();
        session.feed(&client_frame(Opcode::Text, b"hello", true));
        assert_eq!(
            session.next_event().unwrap(),
            Some(WsEvent::Message {
                opcode: Opcode::Text,
                payload: Bytes::from_static(b"hello"),
            })
        );
        assert_eq!(session.next_event().unwrap(), None);
    }

    #[test]
    fn test_fragmented_message_delivered_once() {
        let mut session = open_server();
        session.feed(&client_frame(Opcode::Text, b"Hel", false));
        session.feed(&client_frame(Opcode::Continuation, b"lo", true));

        assert_eq!(session.next_event().unwrap(), Some(WsEvent::AwaitingContinuation));
        let buffer = session.fragments().unwrap();
        assert_eq!(&buffer.payload[..], b"Hel");
        assert_eq!(buffer.mask, Some(MASK));

        assert_eq!(
            session.next_event().unwrap(),
            Some(WsEvent::Message {
                opcode: Opcode::Text,
                payload: Bytes::from_static(b"Hello"),
            })
        );
        assert!(session.fragments().is_none());
    }

    #[test]
    fn test_middle_continuation_appends() {
        let mut session = open_server();
        session.feed(&client_frame(Opcode::Binary, b"a", false));
        session.feed(&client_frame(Opcode::Continuation, b"b", false));
        session.feed(&client_frame(Opcode::Continuation, b"c", true));

        let mut messages = Vec::new();
        while let Some(event) = session.next_event().unwrap() {
            if let WsEvent::Message { opcode, payload } = event {
                messages.push((opcode, payload));
            }
        }
        assert_eq!(messages, vec![(Opcode::Binary, Bytes::from_static(b"abc"))]);
    }

    #[test]
    fn test_ping_between_fragments() {
        let mut session = open_server();
        session.feed(&client_frame(Opcode::Text, b"x", false));
        session.feed(&client_frame(Opcode::Ping, b"", true));
        session.feed(&client_frame(Opcode::Continuation, b"y", true));

        assert_eq!(session.next_event().unwrap(), Some(WsEvent::AwaitingContinuation));
        assert_eq!(session.next_event().unwrap(), Some(WsEvent::Ping(Bytes::new())));
        assert!(session.next_event().unwrap().unwrap().is_message());
    }

    #[test]
    fn test_pong_frame_is_zero_length() {
        let session = open_server();
        let pong = session.pong_frame().unwrap();
        assert_eq!(pong, vec![0x8A, 0x00]);
    }

    #[test]
    fn test_unmasked_client_frame_rejected() {
        let mut session = open_server();
        session.feed(&encode_frame(Opcode::Text, b"plain", true, None).unwrap());
        assert_eq!(session.next_event().unwrap_err(), WsError::UnmaskedFrame);
    }

    #[test]
    fn test_orphan_continuation_rejected() {
        let mut session = open_server();
        session.feed(&client_frame(Opcode::Continuation, b"z", true));
        assert!(matches!(
            session.next_event(),
            Err(WsError::InvalidSequence(_))
        ));
    }

    #[test]
    fn test_data_frame_inside_fragmented_message_rejected() {
        let mut session = open_server();
        session.feed(&client_frame(Opcode::Text, b"a", false));
        session.feed(&client_frame(Opcode::Text, b"b", true));
        session.next_event().unwrap();
        assert!(matches!(
            session.next_event(),
            Err(WsError::InvalidSequence(_))
        ));
    }

    #[test]
    fn test_control_and_reserved_opcodes() {
        let mut session = open_server();
        session.feed(&client_frame(Opcode::Pong, b"", true));
        session.feed(&client_frame(Opcode::Reserved(0x3), b"??", true));
        session.feed(&client_frame(Opcode::Close, b"", true));

        assert_eq!(session.next_event().unwrap(), Some(WsEvent::Pong));
        assert_eq!(session.next_event().unwrap(), Some(WsEvent::Ignored(0x3)));
        assert_eq!(session.next_event().unwrap(), Some(WsEvent::Close));
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut session = open_server();
        let bytes = client_frame(Opcode::Text, b"split", true);
        session.feed(&bytes[..4]);
        assert_eq!(session.next_event().unwrap(), None);
        assert_eq!(session.buffered(), 4);
        session.feed(&bytes[4..]);
        assert!(session.next_event().unwrap().unwrap().is_message());
    }

    #[test]
    fn test_frame_size_limit() {
        let mut session = WsSession::server(WebSocketConfig::new().max_frame_size(4));
        session.feed(b"GET / HTTP/1.1\r\nSec-WebSocket-Key: k\r\n\r\n");
        let request = session.take_handshake_request().unwrap().unwrap();
        session.complete_handshake(&request);
        session.feed(&client_frame(Opcode::Text, b"too long", true));
        assert!(matches!(session.next_event(), Err(WsError::TooLarge { .. })));
    }

    #[test]
    fn test_client_session_masks_and_accepts_unmasked() {
        let mut client = WsSession::client(WebSocketConfig::default());
        let request = client.client_request("localhost", "/", None).unwrap();

        let mut server = WsSession::server(WebSocketConfig::default());
        server.feed(&request);
        let parsed = server.take_handshake_request().unwrap().unwrap();
        client.feed(&server.complete_handshake(&parsed));
        assert!(client.take_handshake_response().unwrap());

        let outbound = client.encode_outbound(b"up").unwrap();
        let (frame, _) = decode_frame(&outbound).unwrap().unwrap();
        assert!(frame.mask.is_some());
        assert_eq!(&frame.payload[..], b"up");

        server.feed(&outbound);
        assert!(server.next_event().unwrap().unwrap().is_message());

        client.feed(&server.encode_outbound(b"down").unwrap());
        assert_eq!(
            client.next_event().unwrap(),
            Some(WsEvent::Message {
                opcode: Opcode::Text,
                payload: Bytes::from_static(b"down"),
            })
        );
    }

    #[test]
    fn test_handshake_state_blocks_send() {
        assert!(HandshakeState::Pending.blocks_send());
        assert!(!HandshakeState::Complete.blocks_send());
        assert!(!HandshakeState::NotApplicable.blocks_send());
    }
}
