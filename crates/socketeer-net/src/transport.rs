//! Connection registry and non-blocking socket operations.
//!
//! Readiness comes from an edge-triggered `mio::Poll`. Because a
//! cooperative loop may stop reading a socket before it is drained, the
//! transport remembers which tokens were last seen readable and keeps
//! reporting them until a read comes back empty.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use indexmap::IndexMap;
use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Events, Interest, Poll, Token};
use socketeer_config::{EngineConfig, Endpoint};
use socketeer_ws::{WebSocketConfig, WsSession};
use tracing::{debug, trace, warn};

use crate::connection::{Connection, ConnectionId, ConnectionKind, ReadOutcome, Socket};
use crate::error::{NetError, NetResult};
use crate::tls::TlsContext;

const EVENT_CAPACITY: usize = 1024;

/// Non-blocking transport over one endpoint.
pub struct Transport {
    poll: Poll,
    events: Events,
    endpoint: Endpoint,
    tls: Option<TlsContext>,
    ws_config: WebSocketConfig,
    ws_protocol: Option<String>,
    read_buffer: Vec<u8>,
    write_limit: usize,
    connect_timeout: Duration,
    connections: IndexMap<ConnectionId, Connection>,
    tokens: HashMap<Token, ConnectionId>,
    readable: HashSet<Token>,
    listener: Option<ConnectionId>,
    next_token: usize,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", &self.endpoint)
            .field("connections", &self.connections.len())
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

impl Transport {
    fn new(config: &EngineConfig, tls: Option<TlsContext>) -> NetResult<Self> {
        let endpoint = config.endpoint()?;
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
            endpoint,
            tls,
            ws_config: WebSocketConfig::new()
                .max_message_size(config.websocket.max_message_size)
                .max_frame_size(config.websocket.max_frame_size)
                .max_handshake_size(config.websocket.max_handshake_size),
            ws_protocol: config.websocket.protocol.clone(),
            read_buffer: vec![0; config.read_buffer_size],
            write_limit: config.max_write_buffer,
            connect_timeout: config.timing.connect_timeout(),
            connections: IndexMap::new(),
            tokens: HashMap::new(),
            readable: HashSet::new(),
            listener: None,
            next_token: 0,
        })
    }

    /// Bind and listen on the configured endpoint.
    ///
    /// For TCP schemes the listening socket becomes the first registry
    /// entry. For UDP the bound socket is the only entry and carries all
    /// datagrams.
    pub fn listen(config: &EngineConfig) -> NetResult<Self> {
        config.validate_server()?;
        let endpoint = config.endpoint()?;
        let tls = if endpoint.scheme.is_tls() {
            Some(TlsContext::server(&config.tls)?)
        } else {
            None
        };

        let mut transport = Self::new(config, tls)?;
        let addr = resolve(&endpoint)?;
        let bind_err = |source: io::Error| NetError::Bind {
            addr: endpoint.authority(),
            source,
        };

        let (kind, socket) = if endpoint.scheme.is_datagram() {
            let socket = UdpSocket::bind(addr).map_err(bind_err)?;
            (
                ConnectionKind::Datagram,
                Socket::Udp {
                    socket,
                    connected: false,
                },
            )
        } else {
            let listener = TcpListener::bind(addr).map_err(bind_err)?;
            (ConnectionKind::Listener, Socket::Listener(listener))
        };

        let id = transport.register(kind, socket, None, None)?;
        transport.listener = Some(id);
        debug!(address = %endpoint, connection_id = %id, "Listening");
        Ok(transport)
    }

    /// Create a client transport without connecting yet.
    pub fn client(config: &EngineConfig) -> NetResult<Self> {
        config.validate()?;
        let endpoint = config.endpoint()?;
        let tls = if endpoint.scheme.is_tls() {
            Some(TlsContext::client(&config.tls, &endpoint.host)?)
        } else {
            None
        };
        Self::new(config, tls)
    }

    /// Open a connection to the configured endpoint.
    ///
    /// Stream connects are bounded by the configured connect timeout.
    /// WebSocket clients queue their upgrade request immediately.
    pub fn connect(&mut self) -> NetResult<ConnectionId> {
        let addr = resolve(&self.endpoint)?;
        let connect_err = |source: io::Error| NetError::Connect {
            addr: addr.to_string(),
            source,
        };

        if self.endpoint.scheme.is_datagram() {
            let local: SocketAddr = if addr.is_ipv4() {
                ([0, 0, 0, 0], 0).into()
            } else {
                (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
            };
            let socket = UdpSocket::bind(local).map_err(connect_err)?;
            socket.connect(addr).map_err(connect_err)?;
            let socket = Socket::Udp {
                socket,
                connected: true,
            };
            return self.register(ConnectionKind::Datagram, socket, Some(addr), None);
        }

        let std_stream =
            std::net::TcpStream::connect_timeout(&addr, self.connect_timeout).map_err(connect_err)?;
        std_stream.set_nodelay(true).map_err(connect_err)?;
        std_stream.set_nonblocking(true).map_err(connect_err)?;
        let stream = TcpStream::from_std(std_stream);

        let socket = match &self.tls {
            Some(ctx) => Socket::Tls {
                stream,
                session: Box::new(ctx.session()?),
            },
            None => Socket::Tcp(stream),
        };

        let ws = self
            .endpoint
            .scheme
            .is_websocket()
            .then(|| WsSession::client(self.ws_config.clone()));
        let request = ws.as_ref().and_then(|session| {
            session.client_request(
                &self.endpoint.authority(),
                &self.endpoint.path,
                self.ws_protocol.as_deref(),
            )
        });

        let id = self.register(ConnectionKind::Stream, socket, Some(addr), ws)?;
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.flush()?;
            if let Some(request) = request {
                conn.write(&request)?;
            }
        }
        debug!(connection_id = %id, peer = %addr, "Connected");
        Ok(id)
    }

    /// Accept one pending connection, if any.
    ///
    /// Returns `Ok(None)` when nothing is waiting or the transport has no
    /// listening stream socket.
    pub fn accept(&mut self) -> NetResult<Option<ConnectionId>> {
        let Some(listener_id) = self.listener else {
            return Ok(None);
        };
        let Some(Socket::Listener(listener)) = self
            .connections
            .get_mut(&listener_id)
            .map(Connection::socket_mut)
        else {
            return Ok(None);
        };

        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = stream.set_nodelay(true) {
            trace!(error = %e, "set_nodelay failed");
        }

        let socket = match &self.tls {
            Some(ctx) => Socket::Tls {
                stream,
                session: Box::new(ctx.session()?),
            },
            None => Socket::Tcp(stream),
        };
        let ws = self
            .endpoint
            .scheme
            .is_websocket()
            .then(|| WsSession::server(self.ws_config.clone()));

        let id = self.register(ConnectionKind::Stream, socket, Some(peer), ws)?;
        debug!(connection_id = %id, peer = %peer, "Accepted connection");
        Ok(Some(id))
    }

    fn register(
        &mut self,
        kind: ConnectionKind,
        mut socket: Socket,
        peer: Option<SocketAddr>,
        ws: Option<WsSession>,
    ) -> NetResult<ConnectionId> {
        let token = Token(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);

        let interest = match kind {
            ConnectionKind::Stream => Interest::READABLE | Interest::WRITABLE,
            ConnectionKind::Listener | ConnectionKind::Datagram => Interest::READABLE,
        };
        self.poll
            .registry()
            .register(socket.source(), token, interest)?;

        let mut id = ConnectionId::new();
        while self.connections.contains_key(&id) {
            id = ConnectionId::new();
        }

        let conn = Connection::new(id, token, kind, socket)
            .with_peer(peer)
            .with_ws(ws)
            .with_write_limit(self.write_limit);
        self.connections.insert(id, conn);
        self.tokens.insert(token, id);
        // a fresh socket may already hold data; the first read finds out
        if kind != ConnectionKind::Listener {
            self.readable.insert(token);
        }
        Ok(id)
    }

    /// Return the connections that may have data to read.
    ///
    /// Waits at most `timeout`, and not at all if some connection is
    /// already known to be readable. Listening sockets are never returned.
    pub fn poll_readable(&mut self, timeout: Duration) -> NetResult<Vec<ConnectionId>> {
        let timeout = if self.readable.is_empty() {
            timeout
        } else {
            Duration::ZERO
        };

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }

        for event in &self.events {
            let token = event.token();
            let Some(id) = self.tokens.get(&token) else {
                continue;
            };
            if self.connections.get(id).is_some_and(Connection::is_listener) {
                continue;
            }
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                self.readable.insert(token);
            }
        }

        Ok(self
            .connections
            .values()
            .filter(|conn| self.readable.contains(&conn.token()))
            .map(Connection::id)
            .collect())
    }

    /// Read once from a connection.
    ///
    /// Successful reads refresh both liveness timestamps.
    pub fn read(&mut self, id: ConnectionId) -> NetResult<ReadOutcome> {
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or(NetError::UnknownConnection(id))?;
        let token = conn.token();
        let outcome = conn.read(&mut self.read_buffer);
        match &outcome {
            Ok(ReadOutcome::Data(bytes)) => {
                trace!(connection_id = %id, len = bytes.len(), "Read");
            }
            Ok(ReadOutcome::Empty | ReadOutcome::Eof) | Err(_) => {
                self.readable.remove(&token);
            }
        }
        Ok(outcome?)
    }

    /// Write bytes to a connection.
    ///
    /// Stream bytes the socket cannot take yet are buffered and pushed on
    /// later writes or [`flush_all`](Self::flush_all). Once a peer stops
    /// reading and the buffer passes `max_write_buffer`, writes fail with
    /// [`NetError::WriteBufferFull`] until it drains.
    pub fn write(&mut self, id: ConnectionId, bytes: &[u8]) -> NetResult<usize> {
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or(NetError::UnknownConnection(id))?;
        if conn.is_listener() {
            return Err(NetError::Unsupported {
                id,
                reason: "write to listening socket",
            });
        }
        match conn.write(bytes) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(NetError::WriteBufferFull {
                id,
                pending: conn.pending_bytes(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Push buffered output on every connection.
    ///
    /// Returns the connections whose flush failed; the caller closes them.
    pub fn flush_all(&mut self) -> Vec<(ConnectionId, io::Error)> {
        let mut failed = Vec::new();
        for conn in self.connections.values_mut() {
            if conn.pending_bytes() == 0 {
                continue;
            }
            if let Err(e) = conn.flush() {
                failed.push((conn.id(), e));
            }
        }
        failed
    }

    /// Remove a connection from the registry and close its socket.
    ///
    /// Returns `None` if the identifier was already gone.
    pub fn close(&mut self, id: ConnectionId) -> Option<Connection> {
        let mut conn = self.connections.shift_remove(&id)?;
        let token = conn.token();
        self.tokens.remove(&token);
        self.readable.remove(&token);
        if self.listener == Some(id) {
            self.listener = None;
        }
        if let Err(e) = self.poll.registry().deregister(conn.socket_mut().source()) {
            warn!(connection_id = %id, error = %e, "Deregister failed");
        }
        conn.shutdown();
        debug!(connection_id = %id, "Closed connection");
        Some(conn)
    }

    /// Look up a connection.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Look up a connection mutably.
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Check if a connection is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Every registered identifier, listener included, in insertion order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Identifiers of connections that carry data (not listening sockets).
    pub fn data_ids(&self) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| !c.is_listener())
            .map(Connection::id)
            .collect()
    }

    /// Number of registered entries, listener included.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// The listening socket (TCP) or bound socket (UDP) of a server.
    pub fn listener_id(&self) -> Option<ConnectionId> {
        self.listener
    }

    /// Local address of the listening socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        let conn = self.connections.get(&self.listener?)?;
        match conn.socket() {
            Socket::Listener(listener) => listener.local_addr().ok(),
            Socket::Udp { socket, .. } => socket.local_addr().ok(),
            Socket::Tcp(_) | Socket::Tls { .. } => None,
        }
    }

    /// The endpoint this transport serves or targets.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

fn resolve(endpoint: &Endpoint) -> NetResult<SocketAddr> {
    let authority = endpoint.authority();
    authority
        .to_socket_addrs()
        .map_err(|_| NetError::Resolve(authority.clone()))?
        .next()
        .ok_or(NetError::Resolve(authority))
}
