//! Per-channel bookkeeping owned by the connection.

use std::collections::{HashMap, VecDeque};

use crate::error::CloseReason;
use crate::message::{Delivery, ReturnedMessage};

/// Callback invoked for each message pushed to a consumer.
pub type ConsumerCallback = Box<dyn FnMut(Delivery)>;

/// Callback invoked for each unroutable mandatory publish handed back.
pub type ReturnHandler = Box<dyn FnMut(ReturnedMessage)>;

/// Lifecycle of one channel. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Open requested, waiting for the broker's confirmation.
    Opening,
    /// Usable for requests.
    Open,
    /// Close handshake in flight.
    Closing,
    /// No further requests are accepted and no frame is sent.
    Closed,
}

/// One registered consumer.
///
/// The callback slot is `None` while the callback is out being invoked;
/// deliveries arriving in that window queue up in `pending` and are drained
/// by whoever holds the callback.
pub(crate) struct ConsumerSlot {
    pub(crate) callback: Option<ConsumerCallback>,
    pub(crate) pending: VecDeque<Delivery>,
}

impl ConsumerSlot {
    pub(crate) fn new(callback: ConsumerCallback) -> Self {
        Self {
            callback: Some(callback),
            pending: VecDeque::new(),
        }
    }
}

/// Channel state the connection owns and event routing mutates.
///
/// Closed cores stay in the connection's map so their number can be handed
/// out again; the epoch tells a stale handle from the current occupant.
pub(crate) struct ChannelCore {
    pub(crate) epoch: u64,
    pub(crate) state: ChannelState,
    pub(crate) close_reason: Option<CloseReason>,
    pub(crate) confirming: bool,
    pub(crate) consumers: HashMap<String, ConsumerSlot>,
    pub(crate) cancelling: Vec<String>,
    /// Handler slot, `None` while the handler is out being invoked.
    pub(crate) return_handler: Option<ReturnHandler>,
    /// Whether a handler is logically present, even when its slot is empty.
    pub(crate) return_handler_installed: bool,
    pub(crate) pending_returns: VecDeque<ReturnedMessage>,
}

impl ChannelCore {
    pub(crate) fn new(epoch: u64) -> Self {
        Self {
            epoch,
            state: ChannelState::Opening,
            close_reason: None,
            confirming: false,
            consumers: HashMap::new(),
            cancelling: Vec::new(),
            return_handler: None,
            return_handler_installed: false,
            pending_returns: VecDeque::new(),
        }
    }

    /// Whether `tag` is registered and not being cancelled.
    pub(crate) fn wants_deliveries_for(&self, tag: &str) -> bool {
        self.consumers.contains_key(tag) && !self.cancelling.iter().any(|t| t == tag)
    }

    /// Drop all consumer bookkeeping, keeping undelivered messages with it.
    pub(crate) fn clear_consumers(&mut self) {
        self.consumers.clear();
        self.cancelling.clear();
    }

    /// Move the channel to `Closed`, recording `reason` unless one is
    /// already set, and drop everything that could trigger further sends.
    pub(crate) fn finalize(&mut self, reason: CloseReason) {
        self.state = ChannelState::Closed;
        if self.close_reason.is_none() {
            self.close_reason = Some(reason);
        }
        self.clear_consumers();
        self.return_handler = None;
        self.return_handler_installed = false;
        self.pending_returns.clear();
    }

    /// The recorded close reason, or a normal-shutdown placeholder.
    pub(crate) fn reason(&self) -> CloseReason {
        self.close_reason
            .clone()
            .unwrap_or_else(|| CloseReason::new(crate::method::REPLY_SUCCESS, "normal shutdown"))
    }
}
