//! Inbound method routing.
//!
//! Each decoded method is either an unsolicited event (a delivery, a
//! returned publish, a broker-initiated close or cancel) or a reply some
//! call is waiting for. Unsolicited events are handled by name; everything
//! else is offered to the correlation registry and discarded with a warning
//! when nobody wants it.

use log::{debug, info, warn};

use super::{Action, Connection, ConnectionState, Inner};
use crate::channel::core::ChannelState;
use crate::error::{CloseReason, Error, Result};
use crate::message::{Delivery, ReturnedMessage};
use crate::method::{
    BasicCancel, BasicDeliver, BasicReturn, Close, ConsumerTag, Content, Method, REPLY_SUCCESS,
};
use crate::metrics;
use crate::transport::Inbound;

impl Inner {
    /// Route every queued inbound method in arrival order.
    pub(super) fn route_pending(&mut self, actions: &mut Vec<Action>) -> Result<()> {
        while let Some(inbound) = self.pending_inbound.pop_front() {
            metrics::inc_methods(metrics::Direction::Inbound);
            self.route_one(inbound, actions)?;
        }
        Ok(())
    }

    fn route_one(&mut self, inbound: Inbound, actions: &mut Vec<Action>) -> Result<()> {
        let Inbound {
            channel,
            method,
            content,
        } = inbound;
        if channel == 0 {
            return self.on_connection_event(method);
        }
        match method {
            Method::ChannelClose(close) => self.on_remote_channel_close(channel, &close),
            Method::BasicDeliver(deliver) => {
                self.on_deliver(channel, deliver, content, actions);
                Ok(())
            }
            Method::BasicReturn(ret) => {
                self.on_return(channel, ret, content, actions);
                Ok(())
            }
            Method::BasicCancel(cancel) => {
                self.on_remote_cancel(channel, &cancel);
                Ok(())
            }
            other => {
                if let Some((unclaimed, _)) = self.dispatch.offer(channel, other, content) {
                    self.discard(channel, &unclaimed);
                }
                Ok(())
            }
        }
    }

    /// Handle a method on the connection channel.
    fn on_connection_event(&mut self, method: Method) -> Result<()> {
        match method {
            Method::ConnectionOpenOk => {
                if self.state == ConnectionState::Connecting {
                    debug!("broker confirmed connection open");
                    self.state = ConnectionState::Open;
                } else {
                    warn!("unexpected Connection.OpenOk in state {:?}", self.state);
                }
                Ok(())
            }
            Method::ConnectionClose(close) => self.on_remote_connection_close(close),
            Method::ConnectionCloseOk => {
                info!("connection closed: reason={}", self.reason());
                self.force_finalize(None);
                Ok(())
            }
            other => {
                self.discard(0, &other);
                Ok(())
            }
        }
    }

    /// The broker is closing the connection underneath us.
    ///
    /// Bookkeeping runs first: every channel learns of the close and the
    /// link is torn down. Only then is a non-success reason raised to
    /// whichever call drove this pass.
    fn on_remote_connection_close(&mut self, close: Close) -> Result<()> {
        let reason = CloseReason::new(close.reply_code, close.reply_text);
        warn!("disconnected by broker: {reason}");
        self.close_reason = Some(reason.clone());
        self.force_finalize(None);
        if reason.code == REPLY_SUCCESS {
            Ok(())
        } else {
            Err(Error::ConnectionClosed(reason))
        }
    }

    /// The broker closed one channel; acknowledge, record, raise.
    ///
    /// The acknowledgement is flushed in this pass. The raised error aborts
    /// the pass before its write attempt, and a caller that stops polling
    /// after catching it must still have acknowledged.
    fn on_remote_channel_close(&mut self, channel: u16, close: &Close) -> Result<()> {
        let reason = CloseReason::new(close.reply_code, close.reply_text.clone());
        warn!("received Channel.Close, closing: channel={channel}, reason={reason}");
        match self.buffer_method(channel, Method::ChannelCloseOk, None) {
            Ok(()) => self.flush_outbound(),
            Err(fault) => debug!("could not acknowledge remote close: {fault}"),
        }
        if let Some(core) = self.channels.get_mut(&channel) {
            if core.state != ChannelState::Closed {
                metrics::dec_channels();
            }
            core.finalize(reason.clone());
        }
        self.dispatch.forget_channel(channel);
        Err(Error::ChannelClosed(reason))
    }

    fn on_deliver(
        &mut self,
        channel: u16,
        deliver: BasicDeliver,
        content: Option<Content>,
        actions: &mut Vec<Action>,
    ) {
        let Some(content) = content else {
            warn!("delivery without content discarded: channel={channel}");
            metrics::inc_discarded_methods();
            return;
        };
        let Some(core) = self.channels.get(&channel) else {
            warn!("delivery for unknown channel {channel} discarded");
            metrics::inc_discarded_methods();
            return;
        };
        if !core.wants_deliveries_for(&deliver.consumer_tag) {
            debug!(
                "dropping delivery for cancelled consumer: tag={}",
                deliver.consumer_tag
            );
            return;
        }
        actions.push(Action::Deliver {
            channel,
            delivery: Delivery::new(deliver, content),
        });
    }

    fn on_return(
        &mut self,
        channel: u16,
        ret: BasicReturn,
        content: Option<Content>,
        actions: &mut Vec<Action>,
    ) {
        let handled = self
            .channels
            .get(&channel)
            .is_some_and(|core| core.return_handler_installed);
        if !handled {
            warn!(
                "unroutable message returned and dropped: exchange={}, routing_key={}, reason=({}) {}",
                ret.exchange, ret.routing_key, ret.reply_code, ret.reply_text
            );
            metrics::inc_discarded_methods();
            return;
        }
        let content = content.unwrap_or_default();
        actions.push(Action::Return {
            channel,
            message: ReturnedMessage::new(ret, content),
        });
    }

    /// The broker cancelled a consumer on its own, e.g. its queue was
    /// deleted.
    fn on_remote_cancel(&mut self, channel: u16, cancel: &BasicCancel) {
        warn!(
            "consumer cancelled by broker: channel={channel}, tag={}",
            cancel.consumer_tag
        );
        if !cancel.nowait {
            let ok = Method::BasicCancelOk(ConsumerTag(cancel.consumer_tag.clone()));
            if let Err(fault) = self.buffer_method(channel, ok, None) {
                debug!("could not acknowledge remote cancel: {fault}");
            }
        }
        if let Some(core) = self.channels.get_mut(&channel) {
            core.consumers.remove(&cancel.consumer_tag);
            core.cancelling.retain(|tag| tag != &cancel.consumer_tag);
        }
    }

    fn discard(&self, channel: u16, method: &Method) {
        warn!(
            "discarding {} on channel {channel}: nobody is waiting for it",
            method.name()
        );
        metrics::inc_discarded_methods();
    }
}

impl Connection {
    /// Hand a delivery to its consumer callback.
    ///
    /// The callback is lifted out of connection state before it runs, so it
    /// may re-enter the connection freely. Deliveries for the same consumer
    /// surfacing from such re-entrant passes queue up behind it and are
    /// drained here before the callback is put back.
    pub(super) fn dispatch_delivery(&self, channel: u16, delivery: Delivery) {
        let tag = delivery.consumer_tag.clone();
        let mut callback = {
            let mut inner = self.inner.borrow_mut();
            let Some(slot) = inner
                .channels
                .get_mut(&channel)
                .and_then(|core| core.consumers.get_mut(&tag))
            else {
                debug!("dropping delivery for vanished consumer: tag={tag}");
                return;
            };
            match slot.callback.take() {
                Some(callback) => callback,
                None => {
                    // Already running further up the stack; that invocation
                    // drains this queue before putting the callback back.
                    slot.pending.push_back(delivery);
                    return;
                }
            }
        };
        callback(delivery);
        loop {
            let next = {
                let mut inner = self.inner.borrow_mut();
                let Some(slot) = inner
                    .channels
                    .get_mut(&channel)
                    .and_then(|core| core.consumers.get_mut(&tag))
                else {
                    // Cancelled during its own callback; the callback goes
                    // with it.
                    return;
                };
                slot.pending.pop_front()
            };
            let Some(queued) = next else { break };
            callback(queued);
        }
        let mut inner = self.inner.borrow_mut();
        if let Some(slot) = inner
            .channels
            .get_mut(&channel)
            .and_then(|core| core.consumers.get_mut(&tag))
        {
            if slot.callback.is_none() {
                slot.callback = Some(callback);
            }
        }
    }

    /// Hand a returned publish to the channel's return handler.
    pub(super) fn dispatch_return(&self, channel: u16, message: ReturnedMessage) {
        let mut handler = {
            let mut inner = self.inner.borrow_mut();
            let Some(core) = inner.channels.get_mut(&channel) else {
                return;
            };
            match core.return_handler.take() {
                Some(handler) => handler,
                None => {
                    if core.return_handler_installed {
                        core.pending_returns.push_back(message);
                    }
                    return;
                }
            }
        };
        handler(message);
        loop {
            let next = {
                let mut inner = self.inner.borrow_mut();
                let Some(core) = inner.channels.get_mut(&channel) else {
                    return;
                };
                core.pending_returns.pop_front()
            };
            let Some(queued) = next else { break };
            handler(queued);
        }
        let mut inner = self.inner.borrow_mut();
        if let Some(core) = inner.channels.get_mut(&channel) {
            if core.return_handler.is_none() && core.return_handler_installed {
                core.return_handler = Some(handler);
            }
        }
    }
}
