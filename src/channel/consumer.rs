//! Consumer lifecycle.
//!
//! Consumers are registered before their request goes out, so a delivery
//! racing the broker's confirmation still finds its callback. Callbacks run
//! on the driving thread from inside event passes; see
//! [`crate::Connection::process_data_events`].

use log::{debug, warn};

use super::Channel;
use super::core::{ChannelState, ConsumerSlot};
use crate::error::{CloseReason, Error, Result};
use crate::message::Delivery;
use crate::method::{BasicCancel, BasicConsume, Method, MethodKind, REPLY_SUCCESS};

impl Channel {
    /// Register `callback` as a consumer on a queue.
    ///
    /// An empty `consumer_tag` in the request gets a generated one; either
    /// way the tag identifying this consumer is returned. The callback runs
    /// for each delivery and may use the channel and connection freely.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed, when the supplied
    /// tag is already registered, when the link fails, or when the broker
    /// refuses the consume by closing the channel.
    pub fn basic_consume(
        &self,
        mut consume: BasicConsume,
        callback: impl FnMut(Delivery) + 'static,
    ) -> Result<String> {
        let tag = {
            let mut inner = self.conn.inner.borrow_mut();
            if inner.is_closed() {
                return Err(inner.closed_error());
            }
            match inner.channel_core(self.number, self.epoch) {
                Some(core) if core.state == ChannelState::Closed => {
                    return Err(Error::ChannelClosed(core.reason()));
                }
                Some(_) => {}
                None => {
                    return Err(Error::ChannelClosed(CloseReason::new(
                        REPLY_SUCCESS,
                        "normal shutdown",
                    )));
                }
            }
            let tag = if consume.consumer_tag.is_empty() {
                inner.next_consumer_tag(self.number)
            } else {
                consume.consumer_tag.clone()
            };
            let Some(core) = inner.channel_core_mut(self.number, self.epoch) else {
                return Err(Error::ChannelClosed(CloseReason::new(
                    REPLY_SUCCESS,
                    "normal shutdown",
                )));
            };
            if core.consumers.contains_key(&tag) {
                return Err(Error::ConsumerTagInUse(tag));
            }
            core.consumers
                .insert(tag.clone(), ConsumerSlot::new(Box::new(callback)));
            tag
        };
        debug!("registering consumer: channel={}, tag={tag}", self.number);
        consume.consumer_tag.clone_from(&tag);

        let outcome = if consume.nowait {
            self.send(Method::BasicConsume(consume), None)
        } else {
            self.rpc(
                Method::BasicConsume(consume),
                None,
                &[MethodKind::BasicConsumeOk],
            )
            .map(|_| ())
        };
        if let Err(fault) = outcome {
            let mut inner = self.conn.inner.borrow_mut();
            if let Some(core) = inner.channel_core_mut(self.number, self.epoch) {
                core.consumers.remove(&tag);
            }
            return Err(fault);
        }
        Ok(tag)
    }

    /// Cancel a consumer registered on this channel.
    ///
    /// Deliveries for the tag arriving while the cancel is in flight are
    /// discarded. Cancelling an unknown tag is a logged no-op.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed, when the link fails,
    /// or when the broker refuses the cancel by closing the channel.
    pub fn basic_cancel(&self, consumer_tag: &str) -> Result<()> {
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
            if !core.consumers.contains_key(consumer_tag) {
                warn!("ignoring cancel for unknown consumer tag {consumer_tag}");
                return Ok(());
            }
            core.cancelling.push(consumer_tag.to_string());
        }
        let result = self.rpc(
            Method::BasicCancel(BasicCancel {
                consumer_tag: consumer_tag.to_string(),
                nowait: false,
            }),
            None,
            &[MethodKind::BasicCancelOk],
        );
        {
            let mut inner = self.conn.inner.borrow_mut();
            if let Some(core) = inner.channel_core_mut(self.number, self.epoch) {
                core.consumers.remove(consumer_tag);
                core.cancelling.retain(|tag| tag != consumer_tag);
            }
        }
        result.map(|_| ())
    }

    /// Whether any consumer is registered on this channel.
    #[must_use]
    pub fn has_consumers(&self) -> bool {
        self.conn
            .inner
            .borrow()
            .channel_core(self.number, self.epoch)
            .is_some_and(|core| !core.consumers.is_empty())
    }

    /// Service the connection until every consumer on this channel is gone.
    ///
    /// Consumers disappear through [`basic_cancel`](Self::basic_cancel)
    /// (callable from inside a consumer callback), a broker-side cancel, or
    /// the channel closing. Returns immediately when none are registered.
    ///
    /// # Errors
    /// Propagates any fault raised by the event passes underneath.
    pub fn start_consuming(&self) -> Result<()> {
        while self.has_consumers() {
            self.conn.process_data_events()?;
        }
        Ok(())
    }

    /// Cancel every consumer registered on this channel.
    ///
    /// # Errors
    /// Fails when a cancel handshake fails; consumers not yet cancelled
    /// stay registered.
    pub fn stop_consuming(&self) -> Result<()> {
        let mut tags: Vec<String> = {
            let inner = self.conn.inner.borrow();
            inner
                .channel_core(self.number, self.epoch)
                .map(|core| core.consumers.keys().cloned().collect())
                .unwrap_or_default()
        };
        tags.sort_unstable();
        for tag in tags {
            self.basic_cancel(&tag)?;
        }
        Ok(())
    }
}
