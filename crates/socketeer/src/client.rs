//! Client facade and its reconnect supervisor.
//!
//! The supervisor task owns the [`ReconnectPolicy`]. It makes the first
//! connection attempt as soon as it is spawned, then watches the
//! connection; whenever it is lost (read or write failure, peer close,
//! missed heartbeats) the policy decides whether to wait and reconnect or
//! to end the client with [`ClientError::ReconnectExhausted`].

use std::rc::Rc;

use socketeer_config::EngineConfig;
use socketeer_net::{ConnectionId, Transport};
use socketeer_tasks::{sleep, yield_point, Scheduler, TaskHandle};
use socketeer_telemetry::metrics::{record_message_sent, record_reconnect_attempt};
use tracing::{error, info, warn};

use crate::callbacks::Callbacks;
use crate::dispatcher::send_loop;
use crate::engine::Engine;
use crate::error::{ClientError, ClientResult, EngineError, EngineResult};
use crate::liveness::heartbeat_loop;
use crate::reader::message_loop;
use crate::reconnect::{ReconnectDecision, ReconnectPolicy};

/// A connecting socket engine.
///
/// # Example
///
/// ```rust,no_run
/// use socketeer::{Callbacks, Client, EngineConfig};
///
/// # fn main() -> Result<(), socketeer::ClientError> {
/// let config = EngineConfig::builder()
///     .address("ws://127.0.0.1:9000/feed")
///     .reconnect(-1, 5)
///     .build();
///
/// let client = Client::connect(config, Callbacks::new().on_message(|_, message| {
///     println!("{}", String::from_utf8_lossy(&message));
///     Ok(())
/// }))?;
/// client.run()?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    engine: Rc<Engine>,
    scheduler: Scheduler,
    supervisor: TaskHandle<ClientResult<()>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("transport", &*self.engine.transport())
            .field("supervisor", &self.supervisor.state())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Start a client for the configured endpoint.
    ///
    /// The first connection attempt happens before this returns. A failed
    /// attempt is not an error here; it goes through the reconnection
    /// policy, and a terminal failure is reported by [`run`](Self::run).
    pub fn connect(config: EngineConfig, callbacks: Callbacks) -> ClientResult<Self> {
        let transport = Transport::client(&config)?;
        let policy = ReconnectPolicy::from_config(&config.reconnect);
        let engine = Rc::new(Engine::new(transport, callbacks, &config));
        info!(address = %config.address, "Client starting");

        let scheduler = Scheduler::new();
        let supervisor = scheduler.spawn("reconnect", supervise(Rc::clone(&engine), policy));
        scheduler.spawn("message", message_loop(Rc::clone(&engine)));
        scheduler.spawn("heartbeat", heartbeat_loop(Rc::clone(&engine)));
        scheduler.spawn("send", send_loop(Rc::clone(&engine)));

        Ok(Self {
            engine,
            scheduler,
            supervisor,
        })
    }

    /// Drive the client on the calling thread.
    ///
    /// Returns `Ok(())` after [`close`](Self::close), or the terminal
    /// failure once reconnection gives up.
    pub fn run(&self) -> ClientResult<()> {
        self.scheduler.run();
        self.outcome()
    }

    /// Drive the client from inside a host async runtime.
    pub async fn drive(&self) -> ClientResult<()> {
        self.scheduler.drive().await;
        self.outcome()
    }

    /// Run a single scheduler cycle. Returns the number of loops still
    /// pending.
    pub fn run_cycle(&self) -> usize {
        self.scheduler.run_cycle()
    }

    fn outcome(&self) -> ClientResult<()> {
        self.supervisor.take_result()?
    }

    /// Check if the client has stopped for good.
    pub fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }

    /// The current connection, if one is open.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.engine.transport().data_ids().first().copied()
    }

    /// Check if a connection is open.
    pub fn is_connected(&self) -> bool {
        self.engine.has_connection()
    }

    /// Write a message on the current connection outside the send loop.
    pub fn send(&self, payload: &[u8]) -> EngineResult<()> {
        let id = self.connection_id().ok_or(EngineError::NotConnected)?;
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

    /// Close the connection and stop without reconnecting.
    pub fn close(&self) {
        info!("Client closing");
        self.engine.shutdown();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if !self.engine.is_stopped() {
            self.engine.shutdown();
        }
    }
}

impl Engine {
    /// One connection attempt. Returns `true` if a connection is open.
    fn open_client(&self) -> bool {
        let connected = self.transport_mut().connect();
        match connected {
            Ok(id) => {
                self.opened(id);
                self.has_connection()
            }
            Err(e) => {
                warn!(error = %e, "Connection attempt failed");
                false
            }
        }
    }
}

/// Keep the client connected for as long as the policy allows.
async fn supervise(engine: Rc<Engine>, mut policy: ReconnectPolicy) -> ClientResult<()> {
    let mut connected = engine.open_client();

    loop {
        if engine.is_stopped() {
            return Ok(());
        }
        if connected {
            yield_point().await;
            connected = engine.has_connection();
            continue;
        }

        match policy.on_failure() {
            ReconnectDecision::GiveUp { attempts } => {
                error!(attempts, "Reconnection attempts exhausted");
                engine.shutdown();
                return Err(ClientError::ReconnectExhausted { attempts });
            }
            ReconnectDecision::Retry { attempt, wait } => {
                info!(attempt, ?wait, "Reconnecting");
                record_reconnect_attempt();
                sleep(wait).await;
                if engine.is_stopped() {
                    return Ok(());
                }
                connected = engine.open_client();
                if connected {
                    info!(attempt, "Reconnected");
                    policy.on_success();
                }
            }
        }
    }
}
