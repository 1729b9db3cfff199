//! One bounded pass of reads, writes, and timers.

use std::time::Instant;

use log::{debug, error, warn};

use super::{Action, ConnectionState, Inner};
use crate::error::{CloseReason, Error, Result};
use crate::method::REPLY_SUCCESS;
use crate::metrics;
use crate::transport::IoStatus;

impl Inner {
    /// One slice of data events against borrowed connection state.
    ///
    /// In order: route anything a cut-short pass left queued, make one read
    /// attempt, route what it produced, make one write attempt when bytes
    /// are buffered, then collect due timer callbacks. Deferred callbacks
    /// land in `actions`; the caller runs them once this borrow is gone.
    ///
    /// A routed fault (remote close, link failure) aborts the pass at the
    /// point it surfaced; inbound methods already decoded stay queued for
    /// the next pass so nothing is lost.
    pub(crate) fn poll_once(&mut self, actions: &mut Vec<Action>) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        self.route_pending(actions)?;

        let mut sink = Vec::new();
        match self.transport.read_once(&mut sink) {
            Ok(IoStatus::Ready) => {
                self.consecutive_timeouts = 0;
                self.stall_warned = false;
                self.frames_without_read = 0;
                self.pending_inbound.extend(sink);
            }
            Ok(IoStatus::TimedOut) => {
                if let Some(fault) = self.handle_io_timeout() {
                    return Err(fault);
                }
            }
            Err(fault) => return Err(self.terminal_io_failure(fault)),
        }
        self.route_pending(actions)?;
        if self.is_closed() {
            // A routed close ended the session; nothing left to write.
            return Ok(());
        }

        if self.transport.outbound_len() > 0 {
            match self.transport.write_once() {
                Ok(IoStatus::Ready) => {
                    self.consecutive_timeouts = 0;
                    self.stall_warned = false;
                }
                Ok(IoStatus::TimedOut) => {
                    if let Some(fault) = self.handle_io_timeout() {
                        return Err(fault);
                    }
                }
                Err(fault) => return Err(self.terminal_io_failure(fault)),
            }
        }
        if self.is_closed() {
            return Ok(());
        }

        for callback in self.timeouts.pop_due(Instant::now()) {
            actions.push(Action::Timer(callback));
        }
        Ok(())
    }

    /// Push buffered bytes out now, best effort.
    ///
    /// For sends that must leave even if the caller stops polling after
    /// this pass, such as acknowledging a broker-initiated close. A
    /// timeout or link fault abandons the flush.
    pub(super) fn flush_outbound(&mut self) {
        while self.transport.outbound_len() > 0 {
            match self.transport.write_once() {
                Ok(IoStatus::Ready) => {}
                Ok(IoStatus::TimedOut) | Err(_) => return,
            }
        }
    }

    /// Count a timed-out attempt and apply the disconnect policy.
    ///
    /// Idle links are normal while open, so the open threshold only warns,
    /// once per silence streak. While closing, a peer ignoring the
    /// handshake is abandoned once the smaller closing threshold is
    /// exceeded: the connection finalizes as closed with no remote reply.
    /// While still connecting the open threshold is terminal instead: a
    /// broker that accepted the socket but never confirms the open is
    /// abandoned rather than polled forever.
    fn handle_io_timeout(&mut self) -> Option<Error> {
        self.consecutive_timeouts += 1;
        metrics::inc_io_timeouts();
        let threshold = if self.is_closing() {
            self.tuning.close_timeout_threshold
        } else {
            self.tuning.open_timeout_threshold
        };
        debug!(
            "handling timeout {} with a threshold of {threshold}",
            self.consecutive_timeouts
        );
        if self.consecutive_timeouts <= threshold {
            return None;
        }
        match self.state {
            ConnectionState::Closing => {
                error!("closing connection due to timeout");
                self.timed_out = true;
                self.force_finalize(None);
                let reason = self.reason();
                if reason.code != REPLY_SUCCESS {
                    return Some(Error::ConnectionClosed(reason));
                }
            }
            ConnectionState::Connecting => {
                error!("broker never confirmed the open, giving up on the handshake");
                self.timed_out = true;
                self.force_finalize(Some(CloseReason::new(320, "open handshake timed out")));
                return Some(Error::Disconnected);
            }
            _ => {
                if !self.stall_warned {
                    warn!(
                        "no traffic for {} consecutive attempts, connection may be stalled",
                        self.consecutive_timeouts
                    );
                    self.stall_warned = true;
                }
            }
        }
        None
    }

    /// Give up on a failed link and surface the fault.
    fn terminal_io_failure(&mut self, fault: crate::transport::TransportError) -> Error {
        error!("connection failed: {fault}");
        self.force_finalize(Some(CloseReason::new(320, "transport failure")));
        Error::Transport(fault)
    }
}
