//! Connection teardown, orderly and otherwise.

use log::{debug, info, warn};

use super::{Connection, ConnectionState, Inner};
use crate::channel::Channel;
use crate::channel::core::ChannelState;
use crate::error::{CloseReason, Error, Result};
use crate::method::{Close, Method};
use crate::metrics;

impl Inner {
    /// Tear the session down locally, no matter what the peer thinks.
    ///
    /// Shuts the transport, finalizes every channel with the connection's
    /// close reason, and clears all reply correlation. Idempotent; a reason
    /// already on record wins over `reason`.
    pub(crate) fn force_finalize(&mut self, reason: Option<CloseReason>) {
        if let Some(reason) = reason {
            if self.close_reason.is_none() {
                self.close_reason = Some(reason);
            }
        }
        self.transport.shutdown();
        self.state = ConnectionState::Closed;
        let reason = self.reason();
        debug!("finalizing connection: reason={reason}");
        for core in self.channels.values_mut() {
            if core.state != ChannelState::Closed {
                metrics::dec_channels();
                core.finalize(reason.clone());
            }
        }
        self.dispatch = crate::dispatch::Dispatch::default();
        self.pending_inbound.clear();
    }
}

impl Connection {
    /// Close the connection through the full handshake.
    ///
    /// Open channels are closed first, each through its own handshake;
    /// channels the broker closes from its side in the meantime are logged
    /// and skipped. The connection then sends `Connection.Close` and blocks
    /// until the broker acknowledges or timeout policy abandons it.
    ///
    /// # Errors
    /// Fails when the connection is already closed, when the link fails
    /// mid-handshake, or when the broker answers with its own non-success
    /// close.
    pub fn close(&self, code: u16, text: &str) -> Result<()> {
        {
            let inner = self.inner.borrow();
            if inner.is_closed() {
                return Err(inner.closed_error());
            }
        }
        info!("closing connection: code={code}, text={text}");

        let open_channels: Vec<(u16, u64)> = {
            let inner = self.inner.borrow();
            let mut entries: Vec<(u16, u64)> = inner
                .channels
                .iter()
                .filter(|(_, core)| {
                    matches!(core.state, ChannelState::Open | ChannelState::Opening)
                })
                .map(|(&number, core)| (number, core.epoch))
                .collect();
            entries.sort_unstable();
            entries
        };
        for (number, epoch) in open_channels {
            let channel = Channel::attach(self.clone(), number, epoch);
            match channel.close(code, text) {
                Ok(()) => {}
                Err(Error::ChannelClosed(reason)) => {
                    warn!("channel {number} was closed from the broker side: {reason}");
                }
                Err(fault) => return Err(fault),
            }
        }

        {
            let mut inner = self.inner.borrow_mut();
            if inner.is_closed() {
                return Err(inner.closed_error());
            }
            inner.state = ConnectionState::Closing;
            inner.close_reason = Some(CloseReason::new(code, text));
            inner.dispatch.forget_channel(0);
            inner.buffer_method(0, Method::ConnectionClose(Close::new(code, text)), None)?;
        }
        while !self.is_closed() {
            self.process_data_events()?;
        }
        Ok(())
    }
}
