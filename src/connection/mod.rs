//! Blocking connection driver.
//!
//! [`Connection`] multiplexes channels over one transport and drives every
//! piece of I/O from the calling thread. All blocking behaviour is built on
//! one primitive: [`Connection::process_data_events`] makes at most one read
//! attempt, at most one write attempt, and fires due timers; higher-level
//! waits loop over it until their own completion condition holds.
//!
//! The handle is a shared reference to connection state; clones address the
//! same connection. It is deliberately not `Send`: exactly one thread of
//! control may drive a connection, and the handle type makes that contract
//! structural instead of documentary.

mod channels;
mod polling;
mod routing;
mod shutdown;
mod state;
#[cfg(test)]
pub(crate) mod test_support;

pub use state::ConnectionState;

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::channel::core::ChannelCore;
use crate::config::Tuning;
use crate::dispatch::Dispatch;
use crate::error::{CloseReason, Result};
use crate::message::{Delivery, ReturnedMessage};
use crate::method::{Content, Method};
use crate::metrics;
use crate::timers::{TimeoutId, TimeoutTable, TimerCallback};
use crate::transport::{Capabilities, Inbound, Transport};

/// Deferred work collected while connection state is borrowed.
///
/// Callbacks may re-enter the connection, so they run only after the pass
/// that produced them has released its borrow.
pub(crate) enum Action {
    Timer(TimerCallback),
    Deliver { channel: u16, delivery: Delivery },
    Return { channel: u16, message: ReturnedMessage },
}

/// Connection state, exclusively owned and mutated single-threaded.
pub(crate) struct Inner {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) tuning: Tuning,
    pub(crate) state: ConnectionState,
    pub(crate) close_reason: Option<CloseReason>,
    pub(crate) timed_out: bool,
    pub(crate) channels: HashMap<u16, ChannelCore>,
    pub(crate) dispatch: Dispatch,
    pub(crate) timeouts: TimeoutTable,
    pub(crate) pending_inbound: VecDeque<Inbound>,
    pub(crate) consecutive_timeouts: u32,
    pub(crate) frames_without_read: u32,
    pub(crate) stall_warned: bool,
    pub(crate) drain_due: bool,
    next_channel_epoch: u64,
    next_consumer_index: u64,
}

impl Inner {
    pub(crate) fn new(transport: Box<dyn Transport>, tuning: Tuning) -> Self {
        Self {
            transport,
            tuning,
            state: ConnectionState::Connecting,
            close_reason: None,
            timed_out: false,
            channels: HashMap::new(),
            dispatch: Dispatch::default(),
            timeouts: TimeoutTable::new(),
            pending_inbound: VecDeque::new(),
            consecutive_timeouts: 0,
            frames_without_read: 0,
            stall_warned: false,
            drain_due: false,
            next_channel_epoch: 0,
            next_consumer_index: 0,
        }
    }

    /// Install a fresh core under `number`, replacing any closed one.
    pub(crate) fn install_channel(&mut self, number: u16) -> u64 {
        self.next_channel_epoch += 1;
        let epoch = self.next_channel_epoch;
        self.channels.insert(number, ChannelCore::new(epoch));
        epoch
    }

    /// The core a handle addresses, unless the number was released and
    /// handed to a newer channel since.
    pub(crate) fn channel_core(&self, number: u16, epoch: u64) -> Option<&ChannelCore> {
        self.channels.get(&number).filter(|core| core.epoch == epoch)
    }

    pub(crate) fn channel_core_mut(&mut self, number: u16, epoch: u64) -> Option<&mut ChannelCore> {
        self.channels
            .get_mut(&number)
            .filter(|core| core.epoch == epoch)
    }

    /// Mint a consumer tag no other consumer on this connection ever used.
    pub(crate) fn next_consumer_tag(&mut self, channel: u16) -> String {
        self.next_consumer_index += 1;
        format!("ctag-{channel}.{}", self.next_consumer_index)
    }

    /// Buffer a method for sending and account for the write-to-read ratio.
    ///
    /// Reaching the ratio marks a drain as due instead of polling inline,
    /// because a send can happen while a pass already holds this state.
    pub(crate) fn buffer_method(
        &mut self,
        channel: u16,
        method: Method,
        content: Option<Content>,
    ) -> Result<()> {
        debug!("sending {} on channel {channel}", method.name());
        self.transport.send_method(channel, method, content)?;
        metrics::inc_methods(metrics::Direction::Outbound);
        self.frames_without_read += 1;
        if self.frames_without_read == self.tuning.write_to_read_ratio {
            self.frames_without_read = 0;
            self.drain_due = true;
        }
        Ok(())
    }
}

/// Handle to one broker connection.
///
/// Cloning is cheap; clones address the same connection.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Rc<RefCell<Inner>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Connection");
        // The state is skipped when a pass already holds the borrow.
        if let Ok(inner) = self.inner.try_borrow() {
            out.field("state", &inner.state);
        }
        out.finish_non_exhaustive()
    }
}

impl Connection {
    /// Connect the transport and block until the broker confirms the link.
    ///
    /// The connect phase runs under [`Tuning::connect_timeout`]; once the
    /// broker's open confirmation arrives, reads and writes switch to
    /// [`Tuning::socket_timeout`].
    ///
    /// # Errors
    /// Returns a transport fault when no link could be established, or the
    /// broker's refusal when it closes the connection during the handshake.
    pub fn open(mut transport: Box<dyn Transport>, tuning: Tuning) -> Result<Self> {
        transport.connect(tuning.connect_timeout)?;
        debug!("bounding the connect phase by {:?}", tuning.connect_timeout);
        transport.set_read_timeout(tuning.connect_timeout)?;

        let connection = Self {
            inner: Rc::new(RefCell::new(Inner::new(transport, tuning))),
        };
        while !connection.is_open() {
            connection.process_data_events()?;
        }
        {
            let mut inner = connection.inner.borrow_mut();
            debug!("switching socket timeout to {:?}", inner.tuning.socket_timeout);
            let timeout = inner.tuning.socket_timeout;
            inner.transport.set_read_timeout(timeout)?;
        }
        info!("connection open");
        Ok(connection)
    }

    /// Process one slice of data events.
    ///
    /// Makes at most one read attempt, at most one write attempt when bytes
    /// are buffered, then fires due timers. Consumer callbacks and timer
    /// actions run before this returns and may re-enter the connection.
    /// Appending this primitive in a loop is how every blocking operation
    /// waits; applications can call it directly to service consumers.
    ///
    /// # Errors
    /// Returns the connection-level fault when the link fails or the peer
    /// closes it, and the channel-level fault when the broker closes a
    /// channel while this pass is processing its events.
    pub fn process_data_events(&self) -> Result<()> {
        self.one_pass()?;
        self.forced_drain_if_due()
    }

    /// Block for `duration` while continuing to service the connection.
    ///
    /// Timer and consumer callbacks still fire while sleeping.
    ///
    /// # Errors
    /// Propagates any fault raised by the event passes underneath.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let woke = Rc::new(Cell::new(false));
        let flag = Rc::clone(&woke);
        self.add_timeout(duration, move || flag.set(true));
        while !woke.get() {
            self.process_data_events()?;
        }
        Ok(())
    }

    /// Schedule `callback` to fire once `delay` has elapsed.
    ///
    /// Callbacks fire from inside an event pass on the driving thread, no
    /// earlier than their deadline and no later than roughly one socket
    /// timeout past it. A callback may use the connection freely.
    pub fn add_timeout(&self, delay: Duration, callback: impl FnOnce() + 'static) -> TimeoutId {
        self.inner
            .borrow_mut()
            .timeouts
            .add(Instant::now(), delay, Box::new(callback))
    }

    /// Cancel a scheduled timeout. Unknown or already-fired ids are ignored.
    pub fn remove_timeout(&self, id: TimeoutId) {
        self.inner.borrow_mut().timeouts.remove(id);
    }

    /// Send a method outside any reply correlation.
    ///
    /// The method is buffered; bytes leave during event passes. Reaching
    /// the write-to-read ratio forces an immediate pass.
    ///
    /// # Errors
    /// Fails when the connection is closed or the transport rejects the
    /// method.
    pub fn send_method(
        &self,
        channel: u16,
        method: Method,
        content: Option<Content>,
    ) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.is_closed() {
                return Err(inner.closed_error());
            }
            inner.buffer_method(channel, method, content)?;
        }
        self.forced_drain_if_due()
    }

    /// Whether the broker has confirmed the connection open.
    #[must_use]
    pub fn is_open(&self) -> bool { self.inner.borrow().is_open() }

    /// Whether a close handshake is in flight.
    #[must_use]
    pub fn is_closing(&self) -> bool { self.inner.borrow().is_closing() }

    /// Whether the connection has fully closed.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.inner.borrow().is_closed() }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { self.inner.borrow().state }

    /// Extensions the broker advertised during the handshake.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities { self.inner.borrow().transport.capabilities() }

    /// The tuning this connection runs under.
    #[must_use]
    pub fn tuning(&self) -> Tuning { self.inner.borrow().tuning }

    /// One event pass plus its deferred callbacks.
    pub(crate) fn one_pass(&self) -> Result<()> {
        let mut actions = Vec::new();
        let result = self.inner.borrow_mut().poll_once(&mut actions);
        self.run_actions(actions);
        result
    }

    /// Run the pass the write-to-read ratio asked for, if any.
    pub(crate) fn forced_drain_if_due(&self) -> Result<()> {
        let due = {
            let mut inner = self.inner.borrow_mut();
            std::mem::take(&mut inner.drain_due)
        };
        if due {
            debug!("write-to-read ratio reached, forcing a drain");
            metrics::inc_forced_drains();
            self.one_pass()?;
        }
        Ok(())
    }

    fn run_actions(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Timer(callback) => callback(),
                Action::Deliver { channel, delivery } => self.dispatch_delivery(channel, delivery),
                Action::Return { channel, message } => self.dispatch_return(channel, message),
            }
        }
    }
}
