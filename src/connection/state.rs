//! Connection lifecycle state management.

use crate::error::{CloseReason, Error};
use crate::method::REPLY_SUCCESS;

use super::Inner;

/// Lifecycle of one connection. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport link established, handshake confirmation outstanding.
    Connecting,
    /// Usable for channels and requests.
    Open,
    /// Close handshake in flight.
    Closing,
    /// No further requests are accepted.
    Closed,
}

impl Inner {
    pub(crate) fn is_open(&self) -> bool { self.state == ConnectionState::Open }

    pub(crate) fn is_closing(&self) -> bool { self.state == ConnectionState::Closing }

    pub(crate) fn is_closed(&self) -> bool { self.state == ConnectionState::Closed }

    /// The close reason on record, or a normal-shutdown placeholder.
    pub(crate) fn reason(&self) -> CloseReason {
        self.close_reason
            .clone()
            .unwrap_or_else(|| CloseReason::new(REPLY_SUCCESS, "normal shutdown"))
    }

    /// The fault to raise for an operation on this closed connection.
    ///
    /// A link torn down by timeout policy reads differently from one closed
    /// through the handshake, so callers can tell silence from shutdown.
    pub(crate) fn closed_error(&self) -> Error {
        if self.timed_out {
            Error::Disconnected
        } else {
            Error::ConnectionClosed(self.reason())
        }
    }
}
