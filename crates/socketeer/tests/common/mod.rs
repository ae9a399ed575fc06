//! Shared helpers for the integration tests.
//!
//! The engine runs on the test thread and is stepped one scheduler cycle
//! at a time; peers run on their own threads with blocking std sockets.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::rc::Rc;
use std::time::{Duration, Instant};

use socketeer::{Bytes, Callbacks, ConnectionId};

pub const PEER_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the callbacks observed.
#[derive(Debug, Default)]
pub struct Recorder {
    pub connected: Vec<ConnectionId>,
    pub messages: Vec<(ConnectionId, Bytes)>,
    pub closed: Vec<ConnectionId>,
    pub outbox: HashMap<ConnectionId, Vec<Bytes>>,
}

pub type Shared = Rc<RefCell<Recorder>>;

pub fn recorder() -> Shared {
    Rc::new(RefCell::new(Recorder::default()))
}

impl Recorder {
    pub fn message_bodies(&self) -> Vec<Bytes> {
        self.messages.iter().map(|(_, m)| m.clone()).collect()
    }
}

/// Callbacks that record every event and queue `reply(message)` back to
/// the sender, when it returns something.
pub fn recording_callbacks<R>(
    state: &Shared,
    greeting: Option<&'static [u8]>,
    reply: R,
) -> Callbacks
where
    R: Fn(&Bytes) -> Option<Bytes> + 'static,
{
    let on_connect = Rc::clone(state);
    let on_message = Rc::clone(state);
    let on_send = Rc::clone(state);
    let on_close = Rc::clone(state);

    Callbacks::new()
        .on_connect(move |id| {
            on_connect.borrow_mut().connected.push(id);
            Ok(greeting.map(Bytes::from_static))
        })
        .on_message(move |id, message| {
            let mut state = on_message.borrow_mut();
            if let Some(answer) = reply(&message) {
                state.outbox.entry(id).or_default().push(answer);
            }
            state.messages.push((id, message));
            Ok(())
        })
        .on_send(move |id| Ok(on_send.borrow_mut().outbox.remove(&id).unwrap_or_default()))
        .on_close(move |id| {
            on_close.borrow_mut().closed.push(id);
            Ok(())
        })
}

/// Echo every message back to its sender.
pub fn echo_callbacks(state: &Shared, greeting: Option<&'static [u8]>) -> Callbacks {
    recording_callbacks(state, greeting, |message| Some(message.clone()))
}

/// Run `cycle` until `done` holds or `timeout` passes. Returns whether
/// `done` was reached.
pub fn pump_until<C, D>(mut cycle: C, timeout: Duration, mut done: D) -> bool
where
    C: FnMut(),
    D: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        cycle();
        if done() {
            return true;
        }
    }
    false
}

/// Connect a blocking peer with read and write timeouts set.
pub fn tcp_peer(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(PEER_TIMEOUT)).unwrap();
    stream.set_write_timeout(Some(PEER_TIMEOUT)).unwrap();
    stream
}

/// A loopback port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Send a raw upgrade request and return the response header block.
pub fn ws_upgrade(stream: &mut TcpStream, protocol: Option<&str>) -> String {
    let mut request = String::from(
        "GET /chat HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n",
    );
    if let Some(protocol) = protocol {
        request.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).unwrap();
    read_header_block(stream)
}

/// Read byte by byte up to and including the blank line.
pub fn read_header_block(stream: &mut TcpStream) -> String {
    let mut block = Vec::new();
    let mut byte = [0u8; 1];
    while !block.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).unwrap() == 0 {
            break;
        }
        block.push(byte[0]);
    }
    String::from_utf8(block).unwrap()
}

/// Read until the peer closes. A reset counts as closed.
pub fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let _ = stream.read_to_end(&mut received);
    received
}
