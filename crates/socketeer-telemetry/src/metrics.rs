//! Engine metrics.
//!
//! Everything is recorded through the `metrics` facade. Nothing is exported
//! from here: hosts install whatever recorder they use, and calls are
//! no-ops until they do.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `socketeer_connections_accepted_total` | Counter | - |
//! | `socketeer_connections_closed_total` | Counter | `reason` |
//! | `socketeer_active_connections` | Gauge | - |
//! | `socketeer_messages_received_total` | Counter | - |
//! | `socketeer_messages_sent_total` | Counter | - |
//! | `socketeer_send_failures_total` | Counter | - |
//! | `socketeer_heartbeats_sent_total` | Counter | - |
//! | `socketeer_reconnect_attempts_total` | Counter | - |
//! | `socketeer_callback_errors_total` | Counter | `callback` |

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Metric names.
pub mod names {
    /// Connections accepted by a server or opened by a client.
    pub const CONNECTIONS_ACCEPTED: &str = "socketeer_connections_accepted_total";
    /// Connections closed, by reason.
    pub const CONNECTIONS_CLOSED: &str = "socketeer_connections_closed_total";
    /// Connections currently in the registry.
    pub const ACTIVE_CONNECTIONS: &str = "socketeer_active_connections";
    /// Application messages delivered to `onMessage`.
    pub const MESSAGES_RECEIVED: &str = "socketeer_messages_received_total";
    /// Messages written by the dispatcher.
    pub const MESSAGES_SENT: &str = "socketeer_messages_sent_total";
    /// Messages whose write failed.
    pub const SEND_FAILURES: &str = "socketeer_send_failures_total";
    /// Heartbeats written by the liveness loop.
    pub const HEARTBEATS_SENT: &str = "socketeer_heartbeats_sent_total";
    /// Client reconnect attempts.
    pub const RECONNECT_ATTEMPTS: &str = "socketeer_reconnect_attempts_total";
    /// Host callbacks that returned an error or panicked.
    pub const CALLBACK_ERRORS: &str = "socketeer_callback_errors_total";
}

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the stream or sent a close frame.
    Peer,
    /// A read or write failed.
    TransportError,
    /// A handshake or framing violation.
    ProtocolError,
    /// No activity for twice the heartbeat interval.
    Dead,
    /// Closed by the host.
    Host,
}

impl CloseReason {
    /// Label value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Peer => "peer",
            Self::TransportError => "transport_error",
            Self::ProtocolError => "protocol_error",
            Self::Dead => "dead",
            Self::Host => "host",
        }
    }
}

/// Registers descriptions for every engine metric with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(names::CONNECTIONS_ACCEPTED, "Connections accepted or opened");
    describe_counter!(names::CONNECTIONS_CLOSED, "Connections closed, by reason");
    describe_gauge!(names::ACTIVE_CONNECTIONS, "Connections currently tracked");
    describe_counter!(names::MESSAGES_RECEIVED, "Application messages received");
    describe_counter!(names::MESSAGES_SENT, "Outbound messages written");
    describe_counter!(names::SEND_FAILURES, "Outbound messages that failed to write");
    describe_counter!(names::HEARTBEATS_SENT, "Heartbeats sent to idle connections");
    describe_counter!(names::RECONNECT_ATTEMPTS, "Client reconnect attempts");
    describe_counter!(names::CALLBACK_ERRORS, "Host callbacks that failed or panicked");
}

/// Records a new connection.
pub fn record_connection_opened() {
    counter!(names::CONNECTIONS_ACCEPTED).increment(1);
    gauge!(names::ACTIVE_CONNECTIONS).increment(1.0);
}

/// Records a closed connection.
pub fn record_connection_closed(reason: CloseReason) {
    counter!(names::CONNECTIONS_CLOSED, "reason" => reason.as_str()).increment(1);
    gauge!(names::ACTIVE_CONNECTIONS).decrement(1.0);
}

/// Records a message delivered to the host.
pub fn record_message_received() {
    counter!(names::MESSAGES_RECEIVED).increment(1);
}

/// Records a message written to a connection.
pub fn record_message_sent() {
    counter!(names::MESSAGES_SENT).increment(1);
}

/// Records a failed outbound write.
pub fn record_send_failure() {
    counter!(names::SEND_FAILURES).increment(1);
}

/// Records a heartbeat.
pub fn record_heartbeat_sent() {
    counter!(names::HEARTBEATS_SENT).increment(1);
}

/// Records a reconnect attempt.
pub fn record_reconnect_attempt() {
    counter!(names::RECONNECT_ATTEMPTS).increment(1);
}

/// Records a failed host callback.
pub fn record_callback_error(callback: &'static str) {
    counter!(names::CALLBACK_ERRORS, "callback" => callback).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_labels() {
        assert_eq!(CloseReason::Peer.as_str(), "peer");
        assert_eq!(CloseReason::Dead.as_str(), "dead");
        assert_eq!(CloseReason::ProtocolError.as_str(), "protocol_error");
    }

    #[test]
    fn test_record_functions_dont_panic() {
        // No recorder installed: every call is a no-op.
        describe_metrics();
        record_connection_opened();
        record_message_received();
        record_message_sent();
        record_send_failure();
        record_heartbeat_sent();
        record_reconnect_attempt();
        record_callback_error("on_message");
        record_connection_closed(CloseReason::Host);
    }

    #[test]
    fn test_metric_names_are_prefixed() {
        for name in [
            names::CONNECTIONS_ACCEPTED,
            names::CONNECTIONS_CLOSED,
            names::ACTIVE_CONNECTIONS,
            names::CALLBACK_ERRORS,
        ] {
            assert!(name.starts_with("socketeer_"));
        }
    }
}
