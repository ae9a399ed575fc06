//! Outbound dispatcher: the send loop.
//!
//! Once per cycle every connection that may send is asked for its pending
//! messages through `on_send`. Messages go out in order, one per
//! suspension. A failed write is reported through `on_send_failed`; with no
//! handler installed the rest of that connection's batch is dropped. If the
//! connection is gone after a failure, the remaining messages are reported
//! at once.

use std::rc::Rc;

use socketeer_net::ConnectionId;
use socketeer_tasks::yield_point;
use socketeer_telemetry::metrics::{record_message_sent, record_send_failure};
use tracing::{debug, warn};

use crate::engine::Engine;

/// Poll the host for outbound messages until the engine stops.
pub(crate) async fn send_loop(engine: Rc<Engine>) {
    debug!(task = "send", "Loop started");
    while !engine.is_stopped() {
        let ids = engine.transport().data_ids();
        for (index, id) in ids.into_iter().enumerate() {
            engine.dispatch(id).await;
            if engine.slice_done(index) {
                yield_point().await;
            }
        }
        engine.flush();
        yield_point().await;
    }
    debug!(task = "send", "Loop stopped");
}

impl Engine {
    /// Write one connection's pending batch.
    ///
    /// Connections with an unfinished upgrade, and a UDP socket that has
    /// not heard from any peer, are skipped without consulting the host.
    pub(crate) async fn dispatch(&self, id: ConnectionId) {
        if !self.ready_to_send(id) {
            return;
        }
        let mut batch = self.callbacks().send(id).into_iter();
        let total = batch.len();

        for (sent, message) in batch.by_ref().enumerate() {
            match self.write_message(id, &message) {
                Ok(()) => record_message_sent(),
                Err(e) => {
                    record_send_failure();
                    debug!(connection_id = %id, error = %e, "Send failed");
                    if e.is_transport() {
                        self.fail(id, &e);
                    }
                    if !self.callbacks().has_on_send_failed() {
                        warn!(
                            connection_id = %id,
                            dropped = total - sent,
                            "Abandoning outbound batch"
                        );
                        return;
                    }
                    self.callbacks().send_failed(id, message);
                    if !self.transport().contains(id) {
                        break;
                    }
                }
            }
            yield_point().await;
        }

        // the connection went away mid-batch; report the rest in one pass
        let rest: Vec<_> = batch.collect();
        if rest.is_empty() {
            return;
        }
        debug!(connection_id = %id, dropped = rest.len(), "Connection gone, failing rest of batch");
        for message in rest {
            record_send_failure();
            self.callbacks().send_failed(id, message);
        }
    }
}
