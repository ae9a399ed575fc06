//! Server facade.
//!
//! `listen` binds the endpoint and spawns the loops: accept (stream
//! schemes only), message, heartbeat and send. Driving the scheduler runs
//! them; under normal operation that never returns.

use std::net::SocketAddr;
use std::rc::Rc;

use socketeer_config::EngineConfig;
use socketeer_net::{ConnectionId, Transport};
use socketeer_tasks::{yield_point, Scheduler, TaskHandle, TaskStats};
use socketeer_telemetry::metrics::record_message_sent;
use socketeer_telemetry::CloseReason;
use tracing::{debug, info, warn};

use crate::callbacks::Callbacks;
use crate::dispatcher::send_loop;
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::liveness::heartbeat_loop;
use crate::reader::message_loop;

/// A listening socket engine.
///
/// # Example
///
/// ```rust,no_run
/// use bytes::Bytes;
/// use socketeer::{Callbacks, EngineConfig, Server};
///
/// # fn main() -> Result<(), socketeer::EngineError> {
/// let callbacks = Callbacks::new()
///     .on_connect(|_| Ok(Some(Bytes::from_static(b"hello\n"))))
///     .on_message(|id, message| {
///         println!("{id} sent {} bytes", message.len());
///         Ok(())
///     });
///
/// let server = Server::listen(EngineConfig::new("ws://0.0.0.0:9000"), callbacks)?;
/// server.run();
/// # Ok(())
/// # }
/// ```
pub struct Server {
    engine: Rc<Engine>,
    scheduler: Scheduler,
    loops: Vec<TaskHandle<()>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("transport", &*self.engine.transport())
            .field("loops", &self.loops.len())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Bind the configured endpoint and start the loops.
    ///
    /// The loops run up to their first suspension before this returns.
    /// For UDP, `on_connect` fires once here for the bound socket, which
    /// is the only registry entry.
    pub fn listen(config: EngineConfig, callbacks: Callbacks) -> EngineResult<Self> {
        let transport = Transport::listen(&config)?;
        let datagram = transport.endpoint().scheme.is_datagram();
        let engine = Rc::new(Engine::new(transport, callbacks, &config));
        info!(
            address = %config.address,
            local_addr = ?engine.transport().local_addr(),
            "Server listening"
        );

        if datagram {
            let socket = engine.transport().listener_id();
            if let Some(id) = socket {
                engine.opened(id);
            }
        }

        let scheduler = Scheduler::new();
        let mut loops = Vec::with_capacity(4);
        if !datagram {
            loops.push(scheduler.spawn("accept", accept_loop(Rc::clone(&engine))));
        }
        loops.push(scheduler.spawn("message", message_loop(Rc::clone(&engine))));
        loops.push(scheduler.spawn("heartbeat", heartbeat_loop(Rc::clone(&engine))));
        loops.push(scheduler.spawn("send", send_loop(Rc::clone(&engine))));

        Ok(Self {
            engine,
            scheduler,
            loops,
        })
    }

    /// Drive the loops on the calling thread until [`shutdown`](Self::shutdown).
    pub fn run(&self) {
        self.scheduler.run();
    }

    /// Drive the loops from inside a host async runtime, yielding to it
    /// between cycles.
    pub async fn drive(&self) {
        self.scheduler.drive().await;
    }

    /// Run a single scheduler cycle. Returns the number of loops still
    /// pending.
    pub fn run_cycle(&self) -> usize {
        self.scheduler.run_cycle()
    }

    /// Check if any loop is still running.
    pub fn is_running(&self) -> bool {
        self.loops.iter().any(|handle| !handle.is_finished())
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.engine.transport().local_addr()
    }

    /// Write a message to one connection outside the send loop.
    pub fn send_to(&self, id: ConnectionId, payload: &[u8]) -> EngineResult<()> {
        match self.engine.write_message(id, payload) {
            Ok(()) => {
                record_message_sent();
                Ok(())
            }
            Err(e) => {
                if e.is_transport() {
                    self.engine.fail(id, &e);
                }
                Err(e)
            }
        }
    }

    /// Close a connection, firing `on_close`. Returns `false` if it was
    /// not open.
    pub fn close_connection(&self, id: ConnectionId) -> bool {
        self.engine.close(id, CloseReason::Host)
    }

    /// Identifiers of the open connections (the bound socket, for UDP).
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.engine.transport().data_ids()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.engine.transport().data_ids().len()
    }

    /// Close every connection and the listening socket, then let the loops
    /// finish. `run` and `drive` return after the next cycle.
    pub fn shutdown(&self) {
        info!(connections = self.connection_count(), "Server shutting down");
        self.engine.shutdown();
    }

    /// Scheduler statistics.
    pub fn stats(&self) -> &TaskStats {
        self.scheduler.stats()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.is_running() {
            debug!("Server dropped while running");
            self.engine.shutdown();
        }
    }
}

/// Accept pending connections, at most one slice per cycle.
async fn accept_loop(engine: Rc<Engine>) {
    debug!(task = "accept", "Loop started");
    while !engine.is_stopped() {
        for _ in 0..engine.slice() {
            let accepted = engine.transport_mut().accept();
            match accepted {
                Ok(Some(id)) => engine.opened(id),
                Ok(None) => break,
                Err(e) => {
                    warn!(task = "accept", error = %e, "Accept failed");
                    break;
                }
            }
        }
        yield_point().await;
    }
    debug!(task = "accept", "Loop stopped");
}
