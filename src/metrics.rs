//! Metric names and recording for `rsock`.
//!
//! Counter and gauge updates funnel through [`record`] so call sites never
//! need feature gates; without the `metrics` feature every event compiles
//! to a no-op.

/// Name of the gauge tracking active connections.
pub const CONNECTIONS_ACTIVE: &str = "rsock_connections_active";
/// Name of the counter tracking processed frames.
pub const FRAMES_PROCESSED: &str = "rsock_frames_processed_total";
/// Name of the counter tracking error occurrences.
pub const ERRORS_TOTAL: &str = "rsock_errors_total";

/// Direction label attached to [`FRAMES_PROCESSED`].
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Frames received from the peer.
    Inbound,
    /// Frames sent to the peer.
    Outbound,
}

/// Countable event in the connection lifecycle.
#[derive(Clone, Copy, Debug)]
pub(crate) enum MetricEvent {
    /// A connection finished its setup handshake.
    ConnectionOpened,
    /// A connection reached its terminal state.
    ConnectionClosed,
    /// One frame crossed the transport.
    Frame(Direction),
    /// A connection failed with an error reason.
    Failure,
}

#[cfg(feature = "metrics")]
pub(crate) fn record(event: MetricEvent) {
    use metrics::{counter, gauge};

    match event {
        MetricEvent::ConnectionOpened => gauge!(CONNECTIONS_ACTIVE).increment(1.0),
        MetricEvent::ConnectionClosed => gauge!(CONNECTIONS_ACTIVE).decrement(1.0),
        MetricEvent::Frame(direction) => {
            let label = match direction {
                Direction::Inbound => "inbound",
                Direction::Outbound => "outbound",
            };
            counter!(FRAMES_PROCESSED, "direction" => label).increment(1);
        }
        MetricEvent::Failure => counter!(ERRORS_TOTAL).increment(1),
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record(_event: MetricEvent) {}
