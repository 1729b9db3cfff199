//! Boundary between the blocking driver and the frame-level engine.
//!
//! The driver never touches sockets or the binary frame grammar. It drives a
//! [`Transport`] implementation one step at a time: at most one read attempt
//! or one write attempt per call, each reporting whether it made progress or
//! ran into the configured socket timeout. Completed inbound methods surface
//! through a caller-supplied sink so a single read may yield zero, one, or
//! many of them.

use std::time::Duration;

use thiserror::Error;

use crate::method::{Content, Method};

/// Outcome of a single bounded read or write attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoStatus {
    /// The attempt moved bytes; timeout accounting starts over.
    Ready,
    /// The socket timeout elapsed before any byte moved.
    TimedOut,
}

/// One complete method received from the broker, with its content where the
/// method carries one.
#[derive(Clone, Debug, PartialEq)]
pub struct Inbound {
    /// Channel the method arrived on; zero is the connection channel.
    pub channel: u16,
    /// The decoded method.
    pub method: Method,
    /// Body and properties, for content-carrying methods.
    pub content: Option<Content>,
}

impl Inbound {
    /// An inbound method without content.
    #[must_use]
    pub fn method(channel: u16, method: Method) -> Self {
        Self {
            channel,
            method,
            content: None,
        }
    }

    /// An inbound method with content attached.
    #[must_use]
    pub fn with_content(channel: u16, method: Method, content: Content) -> Self {
        Self {
            channel,
            method,
            content: Some(content),
        }
    }
}

/// Extensions the broker advertised during the handshake.
///
/// The driver refuses operations whose extension is absent instead of
/// sending a method the broker would kill the connection over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// The broker supports `Confirm.Select` and delivery confirmations.
    pub publisher_confirms: bool,
    /// The broker supports `Basic.Nack`.
    pub basic_nack: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            publisher_confirms: true,
            basic_nack: true,
        }
    }
}

/// Failure raised by a [`Transport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection attempt did not produce an open link.
    #[error("connect attempt failed: {reason}")]
    Connect {
        /// What the connect attempt ran into.
        reason: String,
    },
    /// The underlying stream failed mid-session.
    #[error("stream failure: {0}")]
    Io(#[from] std::io::Error),
    /// The peer sent bytes the frame grammar cannot accept.
    #[error("protocol violation from peer: {0}")]
    Protocol(String),
    /// The transport was shut down and cannot move bytes any more.
    #[error("transport already shut down")]
    Closed,
}

/// Frame-level engine the blocking driver polls.
///
/// Implementations own the socket, the handshake, and the binary frame
/// grammar. Every call is bounded: the driver relies on `read_once` and
/// `write_once` returning within roughly one socket-timeout interval so it
/// can run timers and apply its disconnect policy between attempts.
pub trait Transport {
    /// Establish the link and run the protocol handshake start.
    ///
    /// Runs under `timeout` as a whole. On success the engine is expected to
    /// deliver `Connection.OpenOk` on channel zero through a later
    /// [`read_once`](Transport::read_once).
    ///
    /// # Errors
    /// Returns [`TransportError::Connect`] when no link could be established
    /// within `timeout`.
    fn connect(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// Make at most one read attempt, decoding completed methods into `sink`.
    ///
    /// [`IoStatus::Ready`] reports that bytes arrived, even when they did not
    /// yet complete a method. The sink is append-only; entries already in it
    /// are left alone.
    ///
    /// # Errors
    /// Returns an error when the stream fails or the peer violates the frame
    /// grammar. Both are unrecoverable for the session.
    fn read_once(&mut self, sink: &mut Vec<Inbound>) -> Result<IoStatus, TransportError>;

    /// Make at most one write attempt against the buffered outbound bytes.
    ///
    /// # Errors
    /// Returns an error when the stream fails.
    fn write_once(&mut self) -> Result<IoStatus, TransportError>;

    /// Encode `method` (and `content`, when given) into the outbound buffer.
    ///
    /// Buffering never blocks; bytes leave through
    /// [`write_once`](Transport::write_once).
    ///
    /// # Errors
    /// Returns [`TransportError::Closed`] once the transport was shut down.
    fn send_method(
        &mut self,
        channel: u16,
        method: Method,
        content: Option<Content>,
    ) -> Result<(), TransportError>;

    /// Bytes buffered for writing and not yet on the wire.
    fn outbound_len(&self) -> usize;

    /// Bound every subsequent read and write attempt by `timeout`.
    ///
    /// # Errors
    /// Returns an error when the underlying stream rejects the new deadline.
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// Extensions the broker advertised during the handshake.
    fn capabilities(&self) -> Capabilities;

    /// Tear the link down immediately, discarding buffered bytes.
    ///
    /// Used when timeout policy gives up on a peer. Idempotent.
    fn shutdown(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_constructors_set_content_presence() {
        let bare = Inbound::method(1, Method::ChannelOpenOk);
        assert_eq!(bare.channel, 1);
        assert!(bare.content.is_none());

        let with_body = Inbound::with_content(
            2,
            Method::BasicGetEmpty,
            Content::new(crate::method::Properties::default(), "x"),
        );
        assert_eq!(with_body.content.as_ref().map(|c| c.body.as_ref()), Some(b"x".as_ref()));
    }

    #[test]
    fn capabilities_default_to_a_full_feature_broker() {
        let caps = Capabilities::default();
        assert!(caps.publisher_confirms);
        assert!(caps.basic_nack);
    }
}
