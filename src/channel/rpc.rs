//! The blocking request/reply primitive every channel operation uses.

use super::{Channel, core::ChannelState};
use crate::dispatch::Reply;
use crate::error::{CloseReason, Error, Result};
use crate::method::{Content, Method, MethodKind, REPLY_SUCCESS};
use crate::transport::TransportError;

/// Fault for a reply outside the registered set.
///
/// The registry only ever hands back registered kinds, so reaching this
/// means the broker broke the method contract.
pub(super) fn unexpected_reply(method: &Method) -> Error {
    Error::Transport(TransportError::Protocol(format!(
        "unexpected reply {}",
        method.name()
    )))
}

impl Channel {
    /// Send `method` and block until a reply of one of the `acceptable`
    /// kinds arrives.
    ///
    /// The reply types must enumerate everything the broker may answer
    /// with, negative forms included; replies carry no request id, so an
    /// unlisted answer would never be matched to this call.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed, when the link fails
    /// while draining or waiting, when `method` is one the broker never
    /// answers, or when `acceptable` is empty.
    pub(crate) fn rpc(
        &self,
        method: Method,
        content: Option<Content>,
        acceptable: &[MethodKind],
    ) -> Result<Reply> {
        // An empty set would leave wait_reply with no exit while the
        // channel stays open.
        if acceptable.is_empty() || !method.kind().expects_reply() {
            return Err(Error::NoReplyPossible(method.name()));
        }
        self.begin(method, content, acceptable)?;
        let outcome = self
            .drain_outbound()
            .and_then(|()| self.wait_reply(acceptable));
        self.conn
            .inner
            .borrow_mut()
            .dispatch
            .deregister(self.number, acceptable);
        outcome
    }

    /// Send `method` with no reply wait, draining buffered output.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed or the link fails
    /// while draining.
    pub(crate) fn send(&self, method: Method, content: Option<Content>) -> Result<()> {
        self.begin(method, content, &[])?;
        self.drain_outbound()
    }

    /// Guard against closed state, register interests, buffer the method.
    fn begin(
        &self,
        method: Method,
        content: Option<Content>,
        acceptable: &[MethodKind],
    ) -> Result<()> {
        let mut inner = self.conn.inner.borrow_mut();
        if inner.is_closed() {
            return Err(inner.closed_error());
        }
        let Some(core) = inner.channel_core(self.number, self.epoch) else {
            return Err(Error::ChannelClosed(CloseReason::new(
                REPLY_SUCCESS,
                "normal shutdown",
            )));
        };
        if core.state == ChannelState::Closed {
            return Err(Error::ChannelClosed(core.reason()));
        }
        if !acceptable.is_empty() {
            inner.dispatch.register(self.number, acceptable);
        }
        if let Err(fault) = inner.buffer_method(self.number, method, content) {
            if !acceptable.is_empty() {
                inner.dispatch.deregister(self.number, acceptable);
            }
            return Err(fault);
        }
        Ok(())
    }

    /// Run event passes until the outbound buffer is empty.
    fn drain_outbound(&self) -> Result<()> {
        loop {
            if self.conn.inner.borrow().transport.outbound_len() == 0 {
                return Ok(());
            }
            self.conn.process_data_events()?;
        }
    }

    /// Poll until a registered reply is recorded for this channel.
    ///
    /// The registry is checked before the closed states so a reply routed
    /// by the very pass that ended the session still wins.
    fn wait_reply(&self, acceptable: &[MethodKind]) -> Result<Reply> {
        loop {
            {
                let mut inner = self.conn.inner.borrow_mut();
                if let Some(reply) = inner.dispatch.take_first(self.number, acceptable) {
                    return Ok(reply);
                }
                if inner.is_closed() {
                    return Err(inner.closed_error());
                }
                let channel_reason = inner
                    .channel_core(self.number, self.epoch)
                    .filter(|core| core.state == ChannelState::Closed)
                    .map(super::core::ChannelCore::reason);
                if let Some(reason) = channel_reason {
                    return Err(Error::ChannelClosed(reason));
                }
            }
            self.conn.process_data_events()?;
        }
    }
}
