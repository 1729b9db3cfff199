//! Messages as application code receives them.
//!
//! Inbound content methods arrive from the transport as a method payload
//! plus a detached content block. These types flatten that pair into one
//! value per situation: a consumer delivery, a synchronous get, and a
//! returned unroutable publish.

use bytes::Bytes;

use crate::method::{BasicDeliver, BasicGetOk, BasicReturn, Content, Properties};

/// A message pushed to a registered consumer.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    /// Consumer the message was delivered to.
    pub consumer_tag: String,
    /// Broker-assigned tag for acknowledging this delivery.
    pub delivery_tag: u64,
    /// The message was delivered before and not acknowledged.
    pub redelivered: bool,
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key the message was published with.
    pub routing_key: String,
    /// Message properties.
    pub properties: Properties,
    /// Message body.
    pub body: Bytes,
}

impl Delivery {
    pub(crate) fn new(deliver: BasicDeliver, content: Content) -> Self {
        Self {
            consumer_tag: deliver.consumer_tag,
            delivery_tag: deliver.delivery_tag,
            redelivered: deliver.redelivered,
            exchange: deliver.exchange,
            routing_key: deliver.routing_key,
            properties: content.properties,
            body: content.body,
        }
    }
}

/// A message fetched synchronously from a queue.
#[derive(Clone, Debug, PartialEq)]
pub struct GetMessage {
    /// Broker-assigned tag for acknowledging this delivery.
    pub delivery_tag: u64,
    /// The message was delivered before and not acknowledged.
    pub redelivered: bool,
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key the message was published with.
    pub routing_key: String,
    /// Messages left in the queue after this one.
    pub message_count: u32,
    /// Message properties.
    pub properties: Properties,
    /// Message body.
    pub body: Bytes,
}

impl GetMessage {
    pub(crate) fn new(get_ok: BasicGetOk, content: Content) -> Self {
        Self {
            delivery_tag: get_ok.delivery_tag,
            redelivered: get_ok.redelivered,
            exchange: get_ok.exchange,
            routing_key: get_ok.routing_key,
            message_count: get_ok.message_count,
            properties: content.properties,
            body: content.body,
        }
    }
}

/// A mandatory publish the broker could not route, handed back to us.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnedMessage {
    /// Why the message came back.
    pub reply_code: u16,
    /// Human-readable reason.
    pub reply_text: String,
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key the message was published with.
    pub routing_key: String,
    /// Message properties.
    pub properties: Properties,
    /// Message body.
    pub body: Bytes,
}

impl ReturnedMessage {
    pub(crate) fn new(ret: BasicReturn, content: Content) -> Self {
        Self {
            reply_code: ret.reply_code,
            reply_text: ret.reply_text,
            exchange: ret.exchange,
            routing_key: ret.routing_key,
            properties: content.properties,
            body: content.body,
        }
    }
}

/// Definite outcome of a publish.
///
/// Outside confirmation mode a publish is buffered and drained with no
/// broker verdict, so the only honest answer is [`Sent`](Self::Sent). In
/// confirmation mode the broker must answer one way or the other; there is
/// no "unknown" outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Buffered and drained; no confirmation was requested.
    Sent,
    /// The broker took responsibility for the message.
    Acked,
    /// The broker refused responsibility for the message.
    Nacked,
}

impl PublishOutcome {
    /// Whether the broker confirmed the publish.
    ///
    /// [`Sent`](Self::Sent) counts as not confirmed: without confirmation
    /// mode the broker said nothing.
    #[must_use]
    pub fn is_acked(self) -> bool { matches!(self, Self::Acked) }
}
