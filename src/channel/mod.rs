//! Channel handles and their blocking operations.
//!
//! A [`Channel`] is a lightweight handle onto state the connection owns.
//! Every operation follows the same shape: buffer the request, drain the
//! outbound buffer through the event loop, then poll until the broker's
//! reply for this request type arrives. Requests the broker never answers
//! skip the wait entirely.

mod basic;
mod consumer;
pub(crate) mod core;
mod exchange;
mod modes;
mod queue;
mod rpc;

pub use core::ChannelState;

use std::fmt;

use log::info;

use crate::connection::Connection;
use crate::error::{CloseReason, Error, Result};
use crate::message::ReturnedMessage;
use crate::method::{Close, Method, MethodKind, REPLY_SUCCESS};

/// Handle to one channel multiplexed over a [`Connection`].
///
/// Cloning is cheap; clones address the same channel.
#[derive(Clone)]
pub struct Channel {
    conn: Connection,
    number: u16,
    epoch: u64,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("number", &self.number)
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Wrap an installed channel number.
    pub(crate) fn attach(conn: Connection, number: u16, epoch: u64) -> Self {
        Self {
            conn,
            number,
            epoch,
        }
    }

    /// This channel's number on the connection.
    #[must_use]
    pub fn number(&self) -> u16 { self.number }

    /// The connection this channel is multiplexed over.
    #[must_use]
    pub fn connection(&self) -> &Connection { &self.conn }

    /// Current lifecycle state.
    ///
    /// A handle whose number was released and reused reads as closed.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.conn
            .inner
            .borrow()
            .channel_core(self.number, self.epoch)
            .map_or(ChannelState::Closed, |core| core.state)
    }

    /// Whether the broker has confirmed the channel open.
    #[must_use]
    pub fn is_open(&self) -> bool { self.state() == ChannelState::Open }

    /// Whether the channel has fully closed.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.state() == ChannelState::Closed }

    /// Whether the channel is in publisher-confirmation mode.
    #[must_use]
    pub fn is_confirming(&self) -> bool {
        self.conn
            .inner
            .borrow()
            .channel_core(self.number, self.epoch)
            .is_some_and(|core| core.confirming)
    }

    /// Why the channel closed, once it has.
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.conn
            .inner
            .borrow()
            .channel_core(self.number, self.epoch)
            .and_then(|core| core.close_reason.clone())
    }

    /// Install `handler` for publishes the broker hands back as unroutable.
    ///
    /// Replaces any previous handler. Without one, returned messages are
    /// logged and dropped.
    pub fn on_returned(&self, handler: impl FnMut(ReturnedMessage) + 'static) {
        let mut inner = self.conn.inner.borrow_mut();
        if let Some(core) = inner.channel_core_mut(self.number, self.epoch) {
            core.return_handler = Some(Box::new(handler));
            core.return_handler_installed = true;
        }
    }

    /// Run the open handshake for a freshly installed number.
    pub(crate) fn finish_open(&self) -> Result<()> {
        self.rpc(Method::ChannelOpen, None, &[MethodKind::ChannelOpenOk])?;
        {
            let mut inner = self.conn.inner.borrow_mut();
            if let Some(core) = inner.channel_core_mut(self.number, self.epoch) {
                core.state = ChannelState::Open;
            }
        }
        info!("channel {} open", self.number);
        Ok(())
    }

    /// Close the channel through the full handshake.
    ///
    /// Consumer bookkeeping is dropped up front, so deliveries still in
    /// flight are discarded instead of reaching cancelled callbacks. The
    /// channel always ends closed locally, whatever the handshake does.
    ///
    /// # Errors
    /// Fails when the channel or connection is already closed, and
    /// propagates faults of the handshake itself, including the broker
    /// closing this channel with its own reason first.
    pub fn close(&self, code: u16, text: &str) -> Result<()> {
        {
            let mut inner = self.conn.inner.borrow_mut();
            if inner.is_closed() {
                return Err(inner.closed_error());
            }
            let Some(core) = inner.channel_core_mut(self.number, self.epoch) else {
                return Err(Error::ChannelClosed(CloseReason::new(
                    REPLY_SUCCESS,
                    "normal shutdown",
                )));
            };
            if core.state == ChannelState::Closed {
                return Err(Error::ChannelClosed(core.reason()));
            }
            info!("closing channel {}: code={code}, text={text}", self.number);
            core.state = ChannelState::Closing;
            core.close_reason = Some(CloseReason::new(code, text));
            core.clear_consumers();
        }
        let result = self.rpc(
            Method::ChannelClose(Close::new(code, text)),
            None,
            &[MethodKind::ChannelCloseOk],
        );
        {
            let mut inner = self.conn.inner.borrow_mut();
            if let Some(core) = inner.channel_core_mut(self.number, self.epoch) {
                if core.state != ChannelState::Closed {
                    crate::metrics::dec_channels();
                    core.finalize(CloseReason::new(code, text));
                }
            }
            inner.dispatch.forget_channel(self.number);
        }
        result.map(|_| ())
    }
}
