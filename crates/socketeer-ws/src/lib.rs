//! WebSocket codec for the Socketeer engine.
//!
//! This crate is a byte-level RFC 6455 codec with no I/O of its own:
//!
//! - [`frame`] holds pure encode/decode functions with no hidden state
//! - [`handshake`] builds and parses the HTTP upgrade exchange
//! - [`session`] keeps the per-connection state: handshake progress, the
//!   inbound buffer and the fragment buffer for continuation frames
//!
//! # Example
//!
//! ```rust
//! use socketeer_ws::{WebSocketConfig, WsEvent, WsSession};
//!
//! let mut session = WsSession::server(WebSocketConfig::default());
//! session.feed(b"GET / HTTP/1.1\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n");
//!
//! let request = session.take_handshake_request().unwrap().unwrap();
//! let response = session.complete_handshake(&request);
//! assert!(response.starts_with(b"HTTP/1.1 101"));
//!
//! // A masked "Hi" text frame.
//! session.feed(&[0x81, 0x82, 1, 2, 3, 4, b'H' ^ 1, b'i' ^ 2]);
//! assert!(matches!(session.next_event(), Ok(Some(WsEvent::Message { .. }))));
//! ```
//!
//! # Frame flow
//!
//! ```text
//! bytes ──► feed() ──► take_handshake_request() ──► complete_handshake()
//!                                                        │
//!                      ┌─────────────────────────────────┘
//!                      ▼
//!                next_event() ──► Message | AwaitingContinuation
//!                                 Ping | Pong | Close | Ignored
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod session;

pub use config::WebSocketConfig;
pub use error::{WsError, WsResult};
pub use frame::{
    apply_mask, decode_frame, encode, encode_frame, parse_header, Frame, FrameHeader, Opcode,
};
pub use handshake::{
    build_handshake_response, compute_accept_key, parse_handshake, HandshakeRequest,
    REJECTION_RESPONSE,
};
pub use session::{FragmentBuffer, HandshakeState, Role, WsEvent, WsSession};
