//! Driver tuning knobs.
//!
//! Defaults suit an interactive client against a broker on the same network.
//! Batch tools that tolerate long silences can raise the timeout thresholds;
//! latency-sensitive callers can shrink the socket timeout instead.

use std::time::Duration;

/// Default bound on a single read or write attempt.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_millis(250);

/// Default bound on the connect phase as a whole.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// Default consecutive-timeout streak that triggers a stall warning while
/// the connection is open.
pub const DEFAULT_OPEN_TIMEOUT_THRESHOLD: u32 = 12;

/// Default consecutive-timeout streak that abandons a peer ignoring our
/// close handshake.
pub const DEFAULT_CLOSE_TIMEOUT_THRESHOLD: u32 = 3;

/// Default number of buffered sends without an intervening read before the
/// driver forces a drain.
pub const DEFAULT_WRITE_TO_READ_RATIO: u32 = 1000;

/// Default highest channel number handed out by the driver.
pub const DEFAULT_CHANNEL_MAX: u16 = 2047;

/// Timing and flow-control settings for one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tuning {
    /// Bound on a single read or write attempt. Also the worst-case latency
    /// of timer callbacks, which only run between attempts.
    pub socket_timeout: Duration,
    /// Bound on the connect phase: socket establishment plus handshake start.
    pub connect_timeout: Duration,
    /// Consecutive timed-out attempts while open before the driver logs a
    /// stall warning. An idle connection is not an error, so the open streak
    /// never disconnects on its own. While the open confirmation is still
    /// outstanding the same streak is terminal: a broker that accepted the
    /// socket but never confirms the open is abandoned.
    pub open_timeout_threshold: u32,
    /// Consecutive timed-out attempts while closing before the driver stops
    /// waiting for the peer's half of the handshake and tears the link down.
    pub close_timeout_threshold: u32,
    /// Buffered sends without an intervening read before the driver forces a
    /// full drain, bounding outbound memory during one-sided publish storms.
    pub write_to_read_ratio: u32,
    /// Highest channel number the driver hands out.
    pub channel_max: u16,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            open_timeout_threshold: DEFAULT_OPEN_TIMEOUT_THRESHOLD,
            close_timeout_threshold: DEFAULT_CLOSE_TIMEOUT_THRESHOLD,
            write_to_read_ratio: DEFAULT_WRITE_TO_READ_RATIO,
            channel_max: DEFAULT_CHANNEL_MAX,
        }
    }
}
