//! Metric helpers for the driver.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! every helper compiles to a no-op so call sites stay unconditional.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking open channels.
pub const CHANNELS_OPEN: &str = "lockstep_channels_open";
/// Name of the counter tracking methods moved over the wire.
pub const METHODS_TOTAL: &str = "lockstep_methods_total";
/// Name of the counter tracking timed-out read and write attempts.
pub const IO_TIMEOUTS_TOTAL: &str = "lockstep_io_timeouts_total";
/// Name of the counter tracking drains forced by the write-to-read ratio.
pub const FORCED_DRAINS_TOTAL: &str = "lockstep_forced_drains_total";
/// Name of the counter tracking inbound methods nobody was waiting for.
pub const DISCARDED_METHODS_TOTAL: &str = "lockstep_discarded_methods_total";

/// Direction of method traffic.
#[derive(Clone, Copy)]
pub enum Direction {
    /// Methods received from the broker.
    Inbound,
    /// Methods sent to the broker.
    Outbound,
}

impl Direction {
    #[cfg(feature = "metrics")]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the open channels gauge.
pub fn inc_channels() {
    #[cfg(feature = "metrics")]
    gauge!(CHANNELS_OPEN).increment(1.0);
}

/// Decrement the open channels gauge.
pub fn dec_channels() {
    #[cfg(feature = "metrics")]
    gauge!(CHANNELS_OPEN).decrement(1.0);
}

/// Record a method moved in the given direction.
pub fn inc_methods(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(METHODS_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a timed-out read or write attempt.
pub fn inc_io_timeouts() {
    #[cfg(feature = "metrics")]
    counter!(IO_TIMEOUTS_TOTAL).increment(1);
}

/// Record a drain forced by the write-to-read ratio.
pub fn inc_forced_drains() {
    #[cfg(feature = "metrics")]
    counter!(FORCED_DRAINS_TOTAL).increment(1);
}

/// Record an inbound method discarded for lack of a taker.
pub fn inc_discarded_methods() {
    #[cfg(feature = "metrics")]
    counter!(DISCARDED_METHODS_TOTAL).increment(1);
}
