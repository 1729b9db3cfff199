//! Channel number allocation.

use log::debug;

use super::Connection;
use crate::channel::Channel;
use crate::channel::core::ChannelState;
use crate::error::{CloseReason, Error, Result};
use crate::metrics;

impl Connection {
    /// Open a channel and block until the broker confirms it.
    ///
    /// `number` pins a specific channel number; `None` takes the lowest one
    /// not in use. Closed channels release their number for reuse.
    ///
    /// # Errors
    /// Fails when the connection is closed, when `number` is zero, above
    /// [`crate::config::Tuning::channel_max`], or in use, when no number is
    /// free, or when the broker refuses the open.
    pub fn open_channel(&self, number: Option<u16>) -> Result<Channel> {
        let (number, epoch) = {
            let mut inner = self.inner.borrow_mut();
            if inner.is_closed() {
                return Err(inner.closed_error());
            }
            let max = inner.tuning.channel_max;
            let number = match number {
                Some(number) => {
                    if number == 0 || number > max {
                        return Err(Error::ChannelOutOfRange {
                            channel: number,
                            max,
                        });
                    }
                    let in_use = inner
                        .channels
                        .get(&number)
                        .is_some_and(|core| core.state != ChannelState::Closed);
                    if in_use {
                        return Err(Error::ChannelInUse(number));
                    }
                    number
                }
                None => (1..=max)
                    .find(|candidate| {
                        inner
                            .channels
                            .get(candidate)
                            .is_none_or(|core| core.state == ChannelState::Closed)
                    })
                    .ok_or(Error::NoFreeChannel(max))?,
            };
            let epoch = inner.install_channel(number);
            metrics::inc_channels();
            (number, epoch)
        };
        debug!("opening channel {number}");

        let channel = Channel::attach(self.clone(), number, epoch);
        if let Err(fault) = channel.finish_open() {
            let mut inner = self.inner.borrow_mut();
            if let Some(core) = inner.channel_core_mut(number, epoch) {
                if core.state != ChannelState::Closed {
                    metrics::dec_channels();
                    core.finalize(CloseReason::new(504, "channel open failed"));
                }
            }
            return Err(fault);
        }
        Ok(channel)
    }
}
