//! State shared by the loops of one server or client.
//!
//! The loops run on one thread and never interleave inside a synchronous
//! call, so the registry lives in a `RefCell`. Registry borrows end before
//! any host callback runs, and the callback table lends each slot out for
//! the length of its call, so a callback may hold a clone of the facade and
//! call back into it. `on_close` events raised from inside `on_close` are
//! queued and fired once the running one returns.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use socketeer_config::EngineConfig;
use socketeer_net::{ConnectionId, ConnectionKind, NetError, Transport};
use socketeer_telemetry::metrics::{record_connection_closed, record_connection_opened};
use socketeer_telemetry::CloseReason;
use tracing::{debug, warn};

use crate::callbacks::Callbacks;
use crate::error::{EngineError, EngineResult};

pub(crate) struct Engine {
    transport: RefCell<Transport>,
    callbacks: Callbacks,
    closing: RefCell<VecDeque<ConnectionId>>,
    firing_close: Cell<bool>,
    poll_timeout: Duration,
    heartbeat_interval: Option<Duration>,
    heartbeat_payload: Bytes,
    slice: usize,
    stopped: Cell<bool>,
}

impl Engine {
    pub(crate) fn new(transport: Transport, callbacks: Callbacks, config: &EngineConfig) -> Self {
        Self {
            transport: RefCell::new(transport),
            callbacks,
            closing: RefCell::new(VecDeque::new()),
            firing_close: Cell::new(false),
            poll_timeout: config.timing.poll_timeout(),
            heartbeat_interval: config.timing.heartbeat_interval(),
            heartbeat_payload: Bytes::from(config.heartbeat.payload.clone()),
            slice: config.scheduler.max_items_per_slice.max(1),
            stopped: Cell::new(false),
        }
    }

    pub(crate) fn transport(&self) -> Ref<'_, Transport> {
        self.transport.borrow()
    }

    pub(crate) fn transport_mut(&self) -> RefMut<'_, Transport> {
        self.transport.borrow_mut()
    }

    pub(crate) fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    pub(crate) fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub(crate) fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    pub(crate) fn heartbeat_payload(&self) -> Bytes {
        self.heartbeat_payload.clone()
    }

    /// Work items per slice before a loop suspends.
    pub(crate) fn slice(&self) -> usize {
        self.slice
    }

    /// True after item `index` (0-based) ends a fairness slice.
    pub(crate) fn slice_done(&self, index: usize) -> bool {
        (index + 1) % self.slice == 0
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.get()
    }

    pub(crate) fn stop(&self) {
        self.stopped.set(true);
    }

    /// The bound socket of a server: the TCP listener or the UDP socket.
    pub(crate) fn is_server_socket(&self, id: ConnectionId) -> bool {
        self.transport().listener_id() == Some(id)
    }

    pub(crate) fn has_connection(&self) -> bool {
        !self.transport().data_ids().is_empty()
    }

    /// Count a new connection and greet it.
    ///
    /// WebSocket connections are greeted once their upgrade completes.
    pub(crate) fn opened(&self, id: ConnectionId) {
        record_connection_opened();
        let speaks_ws = self
            .transport()
            .get(id)
            .is_some_and(|conn| conn.ws().is_some());
        if !speaks_ws {
            self.greet(id);
        }
    }

    /// Fire `on_connect` and write the greeting it returns.
    pub(crate) fn greet(&self, id: ConnectionId) {
        let greeting = self.callbacks().connect(id);
        let Some(greeting) = greeting else {
            return;
        };
        match self.write_message(id, &greeting) {
            Ok(()) => debug!(connection_id = %id, len = greeting.len(), "Greeting sent"),
            Err(e) if e.is_transport() => self.fail(id, &e),
            Err(e) => debug!(connection_id = %id, error = %e, "Greeting dropped"),
        }
    }

    /// Check if application messages may be written to the connection.
    pub(crate) fn ready_to_send(&self, id: ConnectionId) -> bool {
        self.transport().get(id).is_some_and(|conn| {
            !conn.handshake_state().blocks_send()
                && (conn.kind() != ConnectionKind::Datagram || conn.peer().is_some())
        })
    }

    /// Write one application message, framing it for WebSocket peers.
    pub(crate) fn write_message(&self, id: ConnectionId, payload: &[u8]) -> EngineResult<()> {
        let mut transport = self.transport_mut();
        let conn = transport.get(id).ok_or(NetError::UnknownConnection(id))?;
        if conn.handshake_state().blocks_send() {
            return Err(EngineError::HandshakePending(id));
        }
        if conn.kind() == ConnectionKind::Datagram && conn.peer().is_none() {
            return Err(EngineError::NoPeer(id));
        }
        let frame = match conn.ws() {
            Some(ws) => Some(ws.encode_outbound(payload)?),
            None => None,
        };
        transport.write(id, frame.as_deref().unwrap_or(payload))?;
        Ok(())
    }

    /// Write bytes as they are, bypassing WebSocket framing.
    pub(crate) fn write_raw(&self, id: ConnectionId, bytes: &[u8]) -> EngineResult<()> {
        self.transport_mut().write(id, bytes)?;
        Ok(())
    }

    /// Push buffered output and close connections whose socket failed.
    pub(crate) fn flush(&self) {
        let failed = self.transport_mut().flush_all();
        for (id, e) in failed {
            self.fail(id, &NetError::Io(e).into());
        }
    }

    /// Close a connection after an error.
    ///
    /// The bound socket of a server is kept; losing it would end the
    /// server for every peer.
    pub(crate) fn fail(&self, id: ConnectionId, err: &EngineError) {
        if self.is_server_socket(id) {
            warn!(connection_id = %id, error = %err, "Error on server socket");
            return;
        }
        warn!(connection_id = %id, error = %err, "Closing connection after error");
        let reason = match err {
            EngineError::Protocol(_) => CloseReason::ProtocolError,
            _ => CloseReason::TransportError,
        };
        self.close(id, reason);
    }

    /// Remove a connection and fire `on_close`.
    ///
    /// Returns `false` if it was already gone, so `on_close` fires at most
    /// once per connection.
    pub(crate) fn close(&self, id: ConnectionId, reason: CloseReason) -> bool {
        let closed = self.transport_mut().close(id);
        let Some(conn) = closed else {
            return false;
        };
        if conn.is_listener() {
            return true;
        }
        drop(conn);
        record_connection_closed(reason);
        debug!(connection_id = %id, reason = reason.as_str(), "Connection closed");
        self.closing.borrow_mut().push_back(id);
        self.fire_closes();
        true
    }

    /// Fire `on_close` for every queued connection, unless an outer call
    /// is already doing so.
    fn fire_closes(&self) {
        if self.firing_close.replace(true) {
            return;
        }
        loop {
            let next = self.closing.borrow_mut().pop_front();
            let Some(id) = next else {
                break;
            };
            self.callbacks.close(id);
        }
        self.firing_close.set(false);
    }

    /// Stop every loop and close every connection.
    pub(crate) fn shutdown(&self) {
        self.stop();
        let ids = self.transport().ids();
        for id in ids {
            self.close(id, CloseReason::Host);
        }
    }
}
