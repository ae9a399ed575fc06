//! Host callback table.
//!
//! Every slot is optional. An unset slot behaves as a no-op, except
//! `on_handshake`, which accepts every upgrade when unset. A callback that
//! returns `Err` or panics is logged, counted, and treated as if it had
//! produced nothing; it never takes down the loop that invoked it.
//!
//! A callback may call back into the engine that invoked it: each slot is
//! taken out of the table for the duration of its call, so no borrow is held
//! while host code runs. A slot invoked again while it is already running is
//! skipped.
//!
//! # Example
//!
//! ```rust
//! use bytes::Bytes;
//! use socketeer::Callbacks;
//!
//! let callbacks = Callbacks::new()
//!     .on_connect(|_id| Ok(Some(Bytes::from_static(b"welcome\n"))))
//!     .on_message(|id, message| {
//!         println!("{id}: {} bytes", message.len());
//!         Ok(())
//!     })
//!     .on_close(|id| {
//!         println!("{id} closed");
//!         Ok(())
//!     });
//! assert!(callbacks.has_on_message());
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use bytes::Bytes;
use socketeer_net::ConnectionId;
use socketeer_telemetry::metrics::record_callback_error;
use tracing::error;

type ConnectFn = dyn FnMut(ConnectionId) -> anyhow::Result<Option<Bytes>>;
type HandshakeFn = dyn FnMut(ConnectionId, Option<&str>) -> anyhow::Result<bool>;
type HeartbeatFn = dyn FnMut(ConnectionId) -> anyhow::Result<Bytes>;
type MessageFn = dyn FnMut(ConnectionId, Bytes) -> anyhow::Result<()>;
type SendFn = dyn FnMut(ConnectionId) -> anyhow::Result<Vec<Bytes>>;
type SendFailedFn = dyn FnMut(ConnectionId, Bytes) -> anyhow::Result<()>;
type CloseFn = dyn FnMut(ConnectionId) -> anyhow::Result<()>;

/// One installed callback.
struct Slot<F: ?Sized> {
    installed: bool,
    f: RefCell<Option<Box<F>>>,
}

impl<F: ?Sized> Default for Slot<F> {
    fn default() -> Self {
        Self {
            installed: false,
            f: RefCell::new(None),
        }
    }
}

impl<F: ?Sized> Slot<F> {
    fn set(&mut self, f: Box<F>) {
        self.installed = true;
        *self.f.get_mut() = Some(f);
    }

    fn is_installed(&self) -> bool {
        self.installed
    }

    /// Run `call` on the callback with the slot emptied. Returns `None` if
    /// the slot is unset or already running further up the stack.
    fn with<T>(&self, call: impl FnOnce(&mut F) -> T) -> Option<T> {
        let mut f = self.f.borrow_mut().take()?;
        let out = call(&mut *f);
        *self.f.borrow_mut() = Some(f);
        Some(out)
    }
}

/// The callbacks a host installs before `listen` or `connect`.
#[derive(Default)]
#[must_use]
pub struct Callbacks {
    on_connect: Slot<ConnectFn>,
    on_handshake: Slot<HandshakeFn>,
    on_heartbeat: Slot<HeartbeatFn>,
    on_message: Slot<MessageFn>,
    on_send: Slot<SendFn>,
    on_send_failed: Slot<SendFailedFn>,
    on_close: Slot<CloseFn>,
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_connect", &self.on_connect.is_installed())
            .field("on_handshake", &self.on_handshake.is_installed())
            .field("on_heartbeat", &self.on_heartbeat.is_installed())
            .field("on_message", &self.on_message.is_installed())
            .field("on_send", &self.on_send.is_installed())
            .field("on_send_failed", &self.on_send_failed.is_installed())
            .field("on_close", &self.on_close.is_installed())
            .finish()
    }
}

impl Callbacks {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per new connection. A returned greeting is written to
    /// the peer immediately (after the upgrade, for WebSocket).
    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: FnMut(ConnectionId) -> anyhow::Result<Option<Bytes>> + 'static,
    {
        self.on_connect.set(Box::new(f));
        self
    }

    /// Decides whether a WebSocket upgrade is accepted. Receives the
    /// protocol that would be echoed back, if the client offered any.
    pub fn on_handshake<F>(mut self, f: F) -> Self
    where
        F: FnMut(ConnectionId, Option<&str>) -> anyhow::Result<bool> + 'static,
    {
        self.on_handshake.set(Box::new(f));
        self
    }

    /// Supplies the heartbeat payload for non-WebSocket connections.
    pub fn on_heartbeat<F>(mut self, f: F) -> Self
    where
        F: FnMut(ConnectionId) -> anyhow::Result<Bytes> + 'static,
    {
        self.on_heartbeat.set(Box::new(f));
        self
    }

    /// Receives every complete inbound message.
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: FnMut(ConnectionId, Bytes) -> anyhow::Result<()> + 'static,
    {
        self.on_message.set(Box::new(f));
        self
    }

    /// Polled once per send cycle for the messages to write to a connection.
    pub fn on_send<F>(mut self, f: F) -> Self
    where
        F: FnMut(ConnectionId) -> anyhow::Result<Vec<Bytes>> + 'static,
    {
        self.on_send.set(Box::new(f));
        self
    }

    /// Receives each outbound message whose write failed.
    ///
    /// Without it, the first failed write abandons the rest of that
    /// connection's batch.
    pub fn on_send_failed<F>(mut self, f: F) -> Self
    where
        F: FnMut(ConnectionId, Bytes) -> anyhow::Result<()> + 'static,
    {
        self.on_send_failed.set(Box::new(f));
        self
    }

    /// Called exactly once when a connection leaves the registry.
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: FnMut(ConnectionId) -> anyhow::Result<()> + 'static,
    {
        self.on_close.set(Box::new(f));
        self
    }

    /// Check if a message handler is installed.
    pub fn has_on_message(&self) -> bool {
        self.on_message.is_installed()
    }

    /// Check if a send-failure handler is installed.
    pub fn has_on_send_failed(&self) -> bool {
        self.on_send_failed.is_installed()
    }

    pub(crate) fn connect(&self, id: ConnectionId) -> Option<Bytes> {
        self.on_connect
            .with(|f| guarded("on_connect", id, || f(id)))
            .flatten()
            .flatten()
    }

    pub(crate) fn handshake(&self, id: ConnectionId, protocol: Option<&str>) -> bool {
        if !self.on_handshake.is_installed() {
            return true;
        }
        self.on_handshake
            .with(|f| guarded("on_handshake", id, || f(id, protocol)))
            .flatten()
            .unwrap_or(false)
    }

    pub(crate) fn heartbeat(&self, id: ConnectionId) -> Option<Bytes> {
        self.on_heartbeat
            .with(|f| guarded("on_heartbeat", id, || f(id)))
            .flatten()
    }

    pub(crate) fn message(&self, id: ConnectionId, message: Bytes) {
        self.on_message
            .with(|f| guarded("on_message", id, || f(id, message)));
    }

    pub(crate) fn send(&self, id: ConnectionId) -> Vec<Bytes> {
        self.on_send
            .with(|f| guarded("on_send", id, || f(id)))
            .flatten()
            .unwrap_or_default()
    }

    pub(crate) fn send_failed(&self, id: ConnectionId, message: Bytes) {
        self.on_send_failed
            .with(|f| guarded("on_send_failed", id, || f(id, message)));
    }

    pub(crate) fn close(&self, id: ConnectionId) {
        self.on_close.with(|f| guarded("on_close", id, || f(id)));
    }
}

/// Run a host callback, containing errors and panics.
fn guarded<T>(
    name: &'static str,
    id: ConnectionId,
    call: impl FnOnce() -> anyhow::Result<T>,
) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!(
                callback = name,
                connection_id = %id,
                error = %format!("{e:#}"),
                "Callback failed"
            );
            record_callback_error(name);
            None
        }
        Err(payload) => {
            error!(
                callback = name,
                connection_id = %id,
                panic = %panic_message(payload.as_ref()),
                "Callback panicked"
            );
            record_callback_error(name);
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_unset_slots_are_noops() {
        let callbacks = Callbacks::new();
        let id = ConnectionId::new();

        assert_eq!(callbacks.connect(id), None);
        assert_eq!(callbacks.heartbeat(id), None);
        assert!(callbacks.send(id).is_empty());
        callbacks.message(id, Bytes::from_static(b"dropped"));
        callbacks.close(id);
    }

    #[test]
    fn test_unset_handshake_accepts() {
        let callbacks = Callbacks::new();
        assert!(callbacks.handshake(ConnectionId::new(), Some("chat")));
    }

    #[test]
    fn test_handshake_error_rejects() {
        let callbacks =
            Callbacks::new().on_handshake(|_, _| Err(anyhow::anyhow!("auth backend down")));
        assert!(!callbacks.handshake(ConnectionId::new(), None));
    }

    #[test]
    fn test_handshake_receives_protocol() {
        let callbacks = Callbacks::new().on_handshake(|_, protocol| Ok(protocol == Some("v2")));
        let id = ConnectionId::new();
        assert!(callbacks.handshake(id, Some("v2")));
        assert!(!callbacks.handshake(id, Some("v1")));
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        let callbacks = Callbacks::new().on_message(move |_, message| {
            seen.set(seen.get() + 1);
            if message.is_empty() {
                panic!("empty message");
            }
            Ok(())
        });
        let id = ConnectionId::new();

        callbacks.message(id, Bytes::new());
        callbacks.message(id, Bytes::from_static(b"ok"));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_failed_send_yields_nothing() {
        let callbacks = Callbacks::new().on_send(|_| anyhow::bail!("queue unavailable"));
        assert!(callbacks.send(ConnectionId::new()).is_empty());
    }

    #[test]
    fn test_connect_greeting() {
        let callbacks =
            Callbacks::new().on_connect(|_| Ok(Some(Bytes::from_static(b"hello"))));
        assert_eq!(
            callbacks.connect(ConnectionId::new()),
            Some(Bytes::from_static(b"hello"))
        );
    }

    #[test]
    fn test_debug_lists_installed_slots() {
        let callbacks = Callbacks::new().on_close(|_| Ok(()));
        let rendered = format!("{callbacks:?}");
        assert!(rendered.contains("on_close: true"));
        assert!(rendered.contains("on_send: false"));
    }
}
