//! Canonical error and result types for the crate.
//!
//! Misuse of the driver (bad channel numbers, waiting on a method that is
//! never answered) is kept apart from session failures (closed channels,
//! lost links) so callers can match on what is retryable.

use std::fmt;

use thiserror::Error;

use crate::transport::TransportError;

/// Why a channel or connection ended, as a protocol reply code and text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseReason {
    /// Protocol reply code.
    pub code: u16,
    /// Human-readable reply text.
    pub text: String,
}

impl CloseReason {
    /// A reason from a code and text.
    #[must_use]
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", self.code, self.text)
    }
}

/// Failure raised by a driver operation.
#[derive(Debug, Error)]
pub enum Error {
    /// The connection is closed; the reason records who gave which cause.
    #[error("connection closed: {0}")]
    ConnectionClosed(CloseReason),
    /// The channel is closed; the reason records who gave which cause.
    #[error("channel closed: {0}")]
    ChannelClosed(CloseReason),
    /// Timeout policy gave up on the peer and tore the link down.
    #[error("timeout exceeded, disconnected")]
    Disconnected,
    /// A reply wait was requested that nothing could ever satisfy, either
    /// for a fire-and-forget method or with no reply kinds registered.
    #[error("no reply possible for {0}")]
    NoReplyPossible(&'static str),
    /// An explicit channel number lies above the configured maximum.
    #[error("channel {channel} exceeds the configured maximum {max}")]
    ChannelOutOfRange {
        /// The rejected channel number.
        channel: u16,
        /// The configured maximum.
        max: u16,
    },
    /// An explicit channel number is already open on this connection.
    #[error("channel {0} is already in use")]
    ChannelInUse(u16),
    /// Every channel number up to the configured maximum is in use.
    #[error("every channel number up to {0} is in use")]
    NoFreeChannel(u16),
    /// The supplied consumer tag is already registered on this channel.
    #[error("consumer tag {0} is already in use")]
    ConsumerTagInUse(String),
    /// The broker did not advertise the extension this operation needs.
    #[error("broker does not support {0}")]
    NotSupported(&'static str),
    /// The frame-level engine failed; the session is unusable.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// Canonical result alias used by the public driver APIs.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_displays_code_then_text() {
        let reason = CloseReason::new(320, "connection forced");
        assert_eq!(reason.to_string(), "(320) connection forced");
    }

    #[test]
    fn errors_carry_their_reason_in_the_message() {
        let err = Error::ChannelClosed(CloseReason::new(406, "precondition failed"));
        assert_eq!(err.to_string(), "channel closed: (406) precondition failed");

        let err = Error::NoReplyPossible("Basic.Ack");
        assert_eq!(err.to_string(), "no reply possible for Basic.Ack");
    }

    #[test]
    fn disconnect_message_is_stable() {
        assert_eq!(Error::Disconnected.to_string(), "timeout exceeded, disconnected");
    }
}
