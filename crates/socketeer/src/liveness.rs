//! Connection liveness.
//!
//! Each connection carries two timestamps: the last successful read, and
//! the last heartbeat sent (refreshed by reads too). A connection quiet for
//! longer than the heartbeat interval is sent a heartbeat. One that has not
//! been read from for [`DEAD_INTERVAL_MULTIPLIER`] intervals is closed.
//!
//! Checks run once per heartbeat slice, so both thresholds are soft: a
//! connection may outlive them by up to one scheduler cycle.

use std::rc::Rc;
use std::time::{Duration, Instant};

use socketeer_net::ConnectionId;
use socketeer_tasks::yield_point;
use socketeer_telemetry::metrics::record_heartbeat_sent;
use socketeer_telemetry::CloseReason;
use tracing::{debug, info, trace};

use crate::engine::Engine;

/// Heartbeat intervals without a read after which a connection is dead.
pub const DEAD_INTERVAL_MULTIPLIER: u32 = 2;

/// Outcome of a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessAction {
    /// Recent activity; nothing to do.
    Healthy,
    /// Quiet for longer than one interval; send a heartbeat.
    Heartbeat,
    /// No read for longer than the dead threshold; close without sending.
    Dead,
}

/// Decide what a connection needs.
///
/// `since_read` is the time since the last read, `since_activity` the time
/// since the more recent of the last read and the last heartbeat.
///
/// ```
/// use std::time::Duration;
/// use socketeer::liveness::{assess, LivenessAction};
///
/// let interval = Duration::from_secs(10);
/// let quiet = Duration::from_secs(11);
/// assert_eq!(assess(quiet, quiet, interval), LivenessAction::Heartbeat);
/// assert_eq!(assess(Duration::from_secs(21), quiet, interval), LivenessAction::Dead);
/// ```
pub fn assess(
    since_read: Duration,
    since_activity: Duration,
    interval: Duration,
) -> LivenessAction {
    if since_read > interval.saturating_mul(DEAD_INTERVAL_MULTIPLIER) {
        LivenessAction::Dead
    } else if since_activity > interval {
        LivenessAction::Heartbeat
    } else {
        LivenessAction::Healthy
    }
}

/// Check every connection once per slice until the engine stops.
///
/// Returns at once when heartbeats are disabled.
pub(crate) async fn heartbeat_loop(engine: Rc<Engine>) {
    let Some(interval) = engine.heartbeat_interval() else {
        debug!(task = "heartbeat", "Heartbeats disabled");
        return;
    };
    debug!(task = "heartbeat", ?interval, "Loop started");

    while !engine.is_stopped() {
        let ids = engine.transport().data_ids();
        for (index, id) in ids.into_iter().enumerate() {
            if !engine.is_server_socket(id) {
                engine.check_liveness(id, interval, Instant::now());
            }
            if engine.slice_done(index) {
                yield_point().await;
            }
        }
        yield_point().await;
    }
    debug!(task = "heartbeat", "Loop stopped");
}

impl Engine {
    pub(crate) fn check_liveness(&self, id: ConnectionId, interval: Duration, now: Instant) {
        let action = {
            let transport = self.transport();
            let Some(conn) = transport.get(id) else {
                return;
            };
            let since_read = now.saturating_duration_since(conn.last_read_time());
            assess(since_read, conn.idle_for(now), interval)
        };

        match action {
            LivenessAction::Healthy => {}
            LivenessAction::Heartbeat => self.send_heartbeat(id, now),
            LivenessAction::Dead => {
                info!(connection_id = %id, "No heartbeat answer, closing connection");
                self.close(id, CloseReason::Dead);
            }
        }
    }

    /// Ping WebSocket peers; write the host's (or the default) payload to
    /// everything else.
    fn send_heartbeat(&self, id: ConnectionId, now: Instant) {
        let ping = {
            let transport = self.transport();
            let Some(conn) = transport.get(id) else {
                return;
            };
            match conn.ws() {
                // nothing can be framed before the upgrade
                Some(ws) if !ws.is_open() => return,
                Some(ws) => Some(ws.ping_frame()),
                None => None,
            }
        };

        let bytes = match ping {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                self.fail(id, &e.into());
                return;
            }
            None => {
                let payload = self.callbacks().heartbeat(id);
                payload.unwrap_or_else(|| self.heartbeat_payload()).to_vec()
            }
        };

        match self.write_raw(id, &bytes) {
            Ok(()) => {
                if let Some(conn) = self.transport_mut().get_mut(id) {
                    conn.mark_heartbeat(now);
                }
                record_heartbeat_sent();
                trace!(connection_id = %id, "Heartbeat sent");
            }
            Err(e) if e.is_backpressure() => {
                debug!(connection_id = %id, error = %e, "Heartbeat skipped");
            }
            Err(e) => self.fail(id, &e),
        }
    }
}
