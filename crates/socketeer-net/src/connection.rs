//! One socket endpoint and its bookkeeping.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::Token;
use socketeer_ws::{HandshakeState, WsSession};
use uuid::Uuid;

use crate::error::tls_io_error;

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a new time-ordered connection ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a registry entry stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// A listening TCP socket. Never read, written or heartbeated.
    Listener,
    /// A TCP stream, optionally wrapped in TLS.
    Stream,
    /// The single UDP socket of a datagram transport.
    Datagram,
}

pub(crate) enum Socket {
    Listener(TcpListener),
    Tcp(TcpStream),
    Tls {
        stream: TcpStream,
        session: Box<rustls::Connection>,
    },
    Udp {
        socket: UdpSocket,
        connected: bool,
    },
}

impl Socket {
    pub(crate) fn source(&mut self) -> &mut dyn mio::event::Source {
        match self {
            Self::Listener(l) => l,
            Self::Tcp(s) | Self::Tls { stream: s, .. } => s,
            Self::Udp { socket, .. } => socket,
        }
    }
}

/// Result of one non-blocking read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes arrived.
    Data(Vec<u8>),
    /// Nothing to read right now.
    Empty,
    /// The peer closed the stream.
    Eof,
}

/// One tracked socket endpoint.
pub struct Connection {
    id: ConnectionId,
    token: Token,
    kind: ConnectionKind,
    socket: Socket,
    peer: Option<SocketAddr>,
    ws: Option<WsSession>,
    outbound: Vec<u8>,
    /// Plaintext handed to the TLS session since it last drained.
    tls_backlog: usize,
    write_limit: usize,
    last_read: Instant,
    last_heartbeat: Instant,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("peer", &self.peer)
            .field("handshake", &self.handshake_state())
            .field("pending_bytes", &self.outbound.len())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        token: Token,
        kind: ConnectionKind,
        socket: Socket,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            token,
            kind,
            socket,
            peer: None,
            ws: None,
            outbound: Vec::new(),
            tls_backlog: 0,
            write_limit: usize::MAX,
            last_read: now,
            last_heartbeat: now,
        }
    }

    pub(crate) fn with_peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self
    }

    pub(crate) fn with_ws(mut self, ws: Option<WsSession>) -> Self {
        self.ws = ws;
        self
    }

    pub(crate) fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = limit;
        self
    }

    pub(crate) fn socket(&self) -> &Socket {
        &self.socket
    }

    pub(crate) fn socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }

    pub(crate) fn token(&self) -> Token {
        self.token
    }

    /// Get the connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the connection kind.
    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    /// Check if this is a listening socket.
    pub fn is_listener(&self) -> bool {
        self.kind == ConnectionKind::Listener
    }

    /// Remote address: the accepted peer, the connect target, or the
    /// last datagram sender.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// WebSocket state, if the connection speaks WebSocket.
    pub fn ws(&self) -> Option<&WsSession> {
        self.ws.as_ref()
    }

    /// Mutable WebSocket state.
    pub fn ws_mut(&mut self) -> Option<&mut WsSession> {
        self.ws.as_mut()
    }

    /// Upgrade progress; `NotApplicable` for plain sockets.
    pub fn handshake_state(&self) -> HandshakeState {
        self.ws
            .as_ref()
            .map_or(HandshakeState::NotApplicable, WsSession::handshake_state)
    }

    /// When bytes were last read.
    pub fn last_read_time(&self) -> Instant {
        self.last_read
    }

    /// When a heartbeat was last sent or bytes were last read.
    pub fn last_heartbeat_time(&self) -> Instant {
        self.last_heartbeat
    }

    /// Time since the more recent of the two activity timestamps.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_read.max(self.last_heartbeat))
    }

    /// Record that a heartbeat was sent.
    pub fn mark_heartbeat(&mut self, at: Instant) {
        self.last_heartbeat = at;
    }

    fn mark_read(&mut self) {
        let now = Instant::now();
        self.last_read = now;
        self.last_heartbeat = now;
    }

    /// Bytes accepted by `write` but not yet on the wire.
    pub fn pending_bytes(&self) -> usize {
        match &self.socket {
            Socket::Tls { session, .. } if session.wants_write() => self.tls_backlog.max(1),
            Socket::Tls { .. } => 0,
            _ => self.outbound.len(),
        }
    }

    /// Refuse `len` more bytes while the unsent backlog would pass the
    /// write limit. An empty backlog always takes the write.
    fn admit(&self, len: usize) -> io::Result<()> {
        let backlog = self.pending_bytes();
        if backlog > 0 && backlog.saturating_add(len) > self.write_limit {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("{backlog} bytes still unsent"),
            ));
        }
        Ok(())
    }

    /// Read once from the socket.
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let outcome = match &mut self.socket {
            Socket::Listener(_) => ReadOutcome::Empty,
            Socket::Tcp(stream) => read_plain(stream, buf)?,
            Socket::Tls { stream, session } => read_tls(stream, session, buf.len())?,
            Socket::Udp { socket, connected } => {
                let result = if *connected {
                    socket.recv(buf).map(|n| (n, None))
                } else {
                    socket.recv_from(buf).map(|(n, from)| (n, Some(from)))
                };
                match result {
                    Ok((n, from)) => {
                        if from.is_some() {
                            self.peer = from;
                        }
                        ReadOutcome::Data(buf[..n].to_vec())
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => ReadOutcome::Empty,
                    Err(e) => return Err(e),
                }
            }
        };
        if matches!(outcome, ReadOutcome::Data(_)) {
            self.mark_read();
        }
        Ok(outcome)
    }

    /// Queue bytes and push as much as the socket takes.
    ///
    /// Fails with `WouldBlock`, leaving nothing queued, while the stream
    /// holds more unsent bytes than its write limit allows.
    pub(crate) fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        match &mut self.socket {
            Socket::Listener(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "cannot write to a listening socket",
            )),
            Socket::Udp { socket, connected } => {
                // datagrams are never partially written or buffered
                if *connected {
                    socket.send(bytes)
                } else {
                    let peer = self.peer.ok_or_else(|| {
                        io::Error::new(io::ErrorKind::NotConnected, "no datagram peer yet")
                    })?;
                    socket.send_to(bytes, peer)
                }
            }
            Socket::Tcp(_) => {
                self.flush()?;
                self.admit(bytes.len())?;
                self.outbound.extend_from_slice(bytes);
                self.flush()?;
                Ok(bytes.len())
            }
            Socket::Tls { .. } => {
                self.flush()?;
                self.admit(bytes.len())?;
                if let Socket::Tls { session, .. } = &mut self.socket {
                    session.writer().write_all(bytes)?;
                }
                self.tls_backlog = self.tls_backlog.saturating_add(bytes.len());
                self.flush()?;
                Ok(bytes.len())
            }
        }
    }

    /// Push buffered bytes until the socket would block.
    pub(crate) fn flush(&mut self) -> io::Result<()> {
        match &mut self.socket {
            Socket::Tcp(stream) => {
                while !self.outbound.is_empty() {
                    match stream.write(&self.outbound) {
                        Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                        Ok(n) => {
                            self.outbound.drain(..n);
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(())
            }
            Socket::Tls { stream, session } => {
                flush_tls(stream, session)?;
                if !session.wants_write() {
                    self.tls_backlog = 0;
                }
                Ok(())
            }
            Socket::Listener(_) | Socket::Udp { .. } => Ok(()),
        }
    }

    /// Best-effort goodbye before the socket is dropped.
    pub(crate) fn shutdown(&mut self) {
        let _ = self.flush();
        match &mut self.socket {
            Socket::Tls { stream, session } => {
                session.send_close_notify();
                let _ = flush_tls(stream, session);
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
            Socket::Tcp(stream) => {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
            Socket::Listener(_) | Socket::Udp { .. } => {}
        }
    }
}

fn read_plain(stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<ReadOutcome> {
    loop {
        match stream.read(buf) {
            Ok(0) => return Ok(ReadOutcome::Eof),
            Ok(n) => return Ok(ReadOutcome::Data(buf[..n].to_vec())),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::Empty),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

fn read_tls(
    stream: &mut TcpStream,
    session: &mut rustls::Connection,
    limit: usize,
) -> io::Result<ReadOutcome> {
    let mut plain = Vec::new();
    let mut eof = false;

    loop {
        match session.read_tls(stream) {
            Ok(0) => {
                eof = true;
                break;
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        let state = session.process_new_packets().map_err(tls_io_error)?;
        let available = state.plaintext_bytes_to_read();
        if available > 0 {
            let start = plain.len();
            plain.resize(start + available, 0);
            session.reader().read_exact(&mut plain[start..])?;
        }
        if state.peer_has_closed() {
            eof = true;
            break;
        }
        if plain.len() >= limit {
            break;
        }
    }

    // handshake messages produced by the packets above
    flush_tls(stream, session)?;

    if !plain.is_empty() {
        Ok(ReadOutcome::Data(plain))
    } else if eof {
        Ok(ReadOutcome::Eof)
    } else {
        Ok(ReadOutcome::Empty)
    }
}

fn flush_tls(stream: &mut TcpStream, session: &mut rustls::Connection) -> io::Result<()> {
    while session.wants_write() {
        match session.write_tls(stream) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }

    #[test]
    fn test_connection_id_time_ordered() {
        let first = ConnectionId::new();
        std::thread::sleep(Duration::from_millis(2));
        let second = ConnectionId::new();
        assert!(first < second);
    }

    #[test]
    fn test_idle_uses_most_recent_timestamp() {
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut conn = Connection::new(
            ConnectionId::new(),
            Token(1),
            ConnectionKind::Listener,
            Socket::Listener(listener),
        );
        let later = conn.last_read_time() + Duration::from_secs(5);
        conn.mark_heartbeat(later);
        assert_eq!(conn.idle_for(later + Duration::from_secs(1)), Duration::from_secs(1));
        assert_eq!(conn.idle_for(later - Duration::from_secs(1)), Duration::ZERO);
        assert_eq!(conn.handshake_state(), HandshakeState::NotApplicable);
        assert!(conn.is_listener());
    }
}
