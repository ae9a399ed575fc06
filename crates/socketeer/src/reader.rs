//! The message loop: reads every readable connection and turns bytes into
//! host messages.
//!
//! Plain sockets hand each read straight to `on_message`. WebSocket
//! connections feed their session, which yields the upgrade request (or
//! response, client side) first and decoded frames after that.

use std::rc::Rc;

use bytes::Bytes;
use socketeer_net::{Connection, ConnectionId, NetError, ReadOutcome};
use socketeer_tasks::yield_point;
use socketeer_telemetry::metrics::record_message_received;
use socketeer_telemetry::CloseReason;
use socketeer_ws::{
    HandshakeRequest, HandshakeState, Role, WsError, WsEvent, WsSession, REJECTION_RESPONSE,
};
use tracing::{debug, error, trace, warn};

use crate::engine::Engine;

/// Poll, read and dispatch until the engine stops.
pub(crate) async fn message_loop(engine: Rc<Engine>) {
    debug!(task = "message", "Loop started");
    while !engine.is_stopped() {
        let ready = engine.transport_mut().poll_readable(engine.poll_timeout());
        match ready {
            Ok(ids) => {
                for (index, id) in ids.into_iter().enumerate() {
                    engine.service(id);
                    if engine.slice_done(index) {
                        yield_point().await;
                    }
                }
            }
            Err(e) => error!(task = "message", error = %e, "Readiness poll failed"),
        }
        yield_point().await;
    }
    debug!(task = "message", "Loop stopped");
}

/// One step of WebSocket processing, decided while the registry is
/// borrowed and carried out after the borrow ends.
enum WsStep {
    Wait,
    Upgrade(HandshakeRequest),
    Upgraded,
    Event(WsEvent),
    Failed(WsError, Role),
}

impl Engine {
    /// Read once from a connection and handle what arrived.
    pub(crate) fn service(&self, id: ConnectionId) {
        let outcome = self.transport_mut().read(id);
        match outcome {
            Ok(ReadOutcome::Data(bytes)) => self.received(id, bytes),
            Ok(ReadOutcome::Empty) | Err(NetError::UnknownConnection(_)) => {}
            Ok(ReadOutcome::Eof) => {
                debug!(connection_id = %id, "Peer closed connection");
                self.close(id, CloseReason::Peer);
            }
            Err(e) => self.fail(id, &e.into()),
        }
    }

    fn received(&self, id: ConnectionId, bytes: Vec<u8>) {
        let plain = match self.transport_mut().get_mut(id).and_then(Connection::ws_mut) {
            Some(ws) => {
                ws.feed(&bytes);
                false
            }
            None => true,
        };
        if plain {
            record_message_received();
            self.callbacks().message(id, Bytes::from(bytes));
        } else {
            self.drain_ws(id);
        }
    }

    fn ws_step(&self, id: ConnectionId) -> WsStep {
        let mut transport = self.transport_mut();
        let Some(ws) = transport.get_mut(id).and_then(Connection::ws_mut) else {
            return WsStep::Wait;
        };
        let role = ws.role();
        let step = match (role, ws.handshake_state()) {
            (Role::Server, HandshakeState::Pending) => ws
                .take_handshake_request()
                .map(|request| request.map_or(WsStep::Wait, WsStep::Upgrade)),
            (Role::Client, HandshakeState::Pending) => ws
                .take_handshake_response()
                .map(|done| if done { WsStep::Upgraded } else { WsStep::Wait }),
            _ => ws
                .next_event()
                .map(|event| event.map_or(WsStep::Wait, WsStep::Event)),
        };
        step.unwrap_or_else(|e| WsStep::Failed(e, role))
    }

    /// Process everything the session has buffered.
    fn drain_ws(&self, id: ConnectionId) {
        loop {
            match self.ws_step(id) {
                WsStep::Wait => return,
                WsStep::Upgrade(request) => {
                    if !self.upgrade(id, &request) {
                        return;
                    }
                }
                WsStep::Upgraded => {
                    debug!(connection_id = %id, "WebSocket upgrade confirmed");
                    self.greet(id);
                }
                WsStep::Event(event) => {
                    if !self.handle_event(id, event) {
                        return;
                    }
                }
                WsStep::Failed(e, Role::Server) if e.is_handshake() => {
                    self.reject(id, &e.to_string());
                    return;
                }
                WsStep::Failed(e, _) => {
                    self.fail(id, &e.into());
                    return;
                }
            }
        }
    }

    /// Ask the host about an upgrade and answer it. Returns `false` if the
    /// connection is gone afterwards.
    fn upgrade(&self, id: ConnectionId, request: &HandshakeRequest) -> bool {
        let accepted = self.callbacks().handshake(id, request.selected_protocol());
        if !accepted {
            self.reject(id, "refused by host");
            return false;
        }

        let response = self
            .transport_mut()
            .get_mut(id)
            .and_then(Connection::ws_mut)
            .map(|ws| ws.complete_handshake(request));
        let Some(response) = response else {
            return false;
        };
        if let Err(e) = self.write_raw(id, &response) {
            self.fail(id, &e);
            return false;
        }
        debug!(
            connection_id = %id,
            protocol = ?request.selected_protocol(),
            "WebSocket upgrade accepted"
        );
        self.greet(id);
        true
    }

    fn reject(&self, id: ConnectionId, reason: &str) {
        warn!(connection_id = %id, reason, "Rejecting WebSocket upgrade");
        if let Err(e) = self.write_raw(id, REJECTION_RESPONSE) {
            debug!(connection_id = %id, error = %e, "Rejection not delivered");
        }
        self.close(id, CloseReason::ProtocolError);
    }

    /// Act on one decoded frame. Returns `false` once the connection is gone.
    fn handle_event(&self, id: ConnectionId, event: WsEvent) -> bool {
        match event {
            WsEvent::Message { payload, .. } => {
                record_message_received();
                self.callbacks().message(id, payload);
                true
            }
            WsEvent::Ping(_) => {
                let pong = self
                    .transport()
                    .get(id)
                    .and_then(Connection::ws)
                    .map(WsSession::pong_frame);
                let written = match pong {
                    Some(Ok(frame)) => self.write_raw(id, &frame),
                    Some(Err(e)) => Err(e.into()),
                    None => return false,
                };
                match written {
                    Ok(()) => {
                        trace!(connection_id = %id, "Answered ping");
                        true
                    }
                    Err(e) if e.is_backpressure() => {
                        debug!(connection_id = %id, error = %e, "Pong not sent");
                        true
                    }
                    Err(e) => {
                        self.fail(id, &e);
                        false
                    }
                }
            }
            WsEvent::Close => {
                debug!(connection_id = %id, "Close frame received");
                self.close(id, CloseReason::Peer);
                false
            }
            WsEvent::AwaitingContinuation | WsEvent::Pong => true,
            WsEvent::Ignored(opcode) => {
                trace!(connection_id = %id, opcode, "Dropped frame with reserved opcode");
                true
            }
        }
    }
}
