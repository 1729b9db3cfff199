//! AMQP 0-9-1 method value objects.
//!
//! The broker never tags replies with a request id; a reply is identified
//! purely by its method type on a given channel. This module therefore models
//! the protocol vocabulary as a closed [`Method`] enum with a fieldless
//! [`MethodKind`] tag used for correlation, instead of inspecting types at
//! runtime. Wire-level layout is out of scope: a [`crate::transport::Transport`]
//! implementation owns the binary grammar and reuses these value objects
//! verbatim.

use std::collections::BTreeMap;

use bincode::{Decode, Encode};
use bytes::Bytes;

/// Reply code used by both peers for a clean, deliberate shutdown.
pub const REPLY_SUCCESS: u16 = 200;

/// Table of custom arguments attached to declarations and bindings.
pub type FieldTable = BTreeMap<String, FieldValue>;

/// Value stored in a [`FieldTable`].
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub enum FieldValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer (covers the protocol's short/long/long-long forms).
    Int(i64),
    /// UTF-8 string.
    Str(String),
}

/// Exchange routing behaviour requested by a declare.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub enum ExchangeKind {
    /// Route on an exact routing-key match.
    Direct,
    /// Route to every bound queue.
    Fanout,
    /// Route on a pattern match against the routing key.
    Topic,
    /// Route on header values instead of the routing key.
    Headers,
    /// A broker-specific exchange type.
    Custom(String),
}

impl ExchangeKind {
    /// Wire name of the exchange type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Direct => "direct",
            Self::Fanout => "fanout",
            Self::Topic => "topic",
            Self::Headers => "headers",
            Self::Custom(name) => name,
        }
    }
}

impl Default for ExchangeKind {
    fn default() -> Self { Self::Direct }
}

/// Basic-class message properties carried by a content frame.
///
/// Only the fields this driver forwards are modelled; absent fields are not
/// sent on the wire.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct Properties {
    /// MIME content type of the body.
    pub content_type: Option<String>,
    /// MIME content encoding of the body.
    pub content_encoding: Option<String>,
    /// Application headers.
    pub headers: Option<FieldTable>,
    /// 1 for transient, 2 for persistent.
    pub delivery_mode: Option<u8>,
    /// Message priority, 0 to 9.
    pub priority: Option<u8>,
    /// Application correlation identifier.
    pub correlation_id: Option<String>,
    /// Address to reply to.
    pub reply_to: Option<String>,
    /// Message expiration specification.
    pub expiration: Option<String>,
    /// Application message identifier.
    pub message_id: Option<String>,
    /// Message timestamp, seconds since the epoch.
    pub timestamp: Option<u64>,
}

/// Properties plus body, for methods that carry content.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Content {
    /// Message properties sent in the content header.
    pub properties: Properties,
    /// Message body bytes.
    pub body: Bytes,
}

impl Content {
    /// Pair `properties` with `body`.
    #[must_use]
    pub fn new(properties: Properties, body: impl Into<Bytes>) -> Self {
        Self {
            properties,
            body: body.into(),
        }
    }
}

macro_rules! methods {
    (
        $(
            $(#[$meta:meta])*
            $variant:ident $( ( $payload:ty ) )? => $name:literal
        ),* $(,)?
    ) => {
        /// One protocol method, with its typed payload where the method
        /// carries one.
        #[derive(Clone, Debug, PartialEq, Encode, Decode)]
        pub enum Method {
            $( $(#[$meta])* $variant $( ($payload) )? ),*
        }

        /// Fieldless tag identifying a [`Method`] variant.
        ///
        /// Correlation registrations and dispatch routing key on this tag.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
        pub enum MethodKind {
            $( $(#[$meta])* $variant ),*
        }

        impl Method {
            /// The correlation tag for this method.
            #[must_use]
            pub fn kind(&self) -> MethodKind {
                match self {
                    $( methods!(@pat $variant $( ($payload) )?) => MethodKind::$variant ),*
                }
            }
        }

        impl MethodKind {
            /// Symbolic `Class.Method` name, as the protocol reference spells it.
            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $name ),*
                }
            }
        }
    };
    (@pat $variant:ident) => { Method::$variant };
    (@pat $variant:ident ($payload:ty)) => { Method::$variant(_) };
}

methods! {
    /// Broker confirmed the connection handshake; the link is usable.
    ConnectionOpenOk => "Connection.OpenOk",
    /// Either peer asks to close the connection.
    ConnectionClose(Close) => "Connection.Close",
    /// Acknowledges a connection close.
    ConnectionCloseOk => "Connection.CloseOk",

    /// Open a channel.
    ChannelOpen => "Channel.Open",
    /// Broker confirmed the channel open.
    ChannelOpenOk => "Channel.OpenOk",
    /// Either peer asks to close the channel.
    ChannelClose(Close) => "Channel.Close",
    /// Acknowledges a channel close.
    ChannelCloseOk => "Channel.CloseOk",

    /// Create or assert an exchange.
    ExchangeDeclare(ExchangeDeclare) => "Exchange.Declare",
    /// Exchange declared.
    ExchangeDeclareOk => "Exchange.DeclareOk",
    /// Delete an exchange.
    ExchangeDelete(ExchangeDelete) => "Exchange.Delete",
    /// Exchange deleted.
    ExchangeDeleteOk => "Exchange.DeleteOk",
    /// Bind an exchange to another exchange.
    ExchangeBind(ExchangeBind) => "Exchange.Bind",
    /// Exchange bound.
    ExchangeBindOk => "Exchange.BindOk",
    /// Remove an exchange-to-exchange binding.
    ExchangeUnbind(ExchangeBind) => "Exchange.Unbind",
    /// Exchange unbound.
    ExchangeUnbindOk => "Exchange.UnbindOk",

    /// Create or assert a queue.
    QueueDeclare(QueueDeclare) => "Queue.Declare",
    /// Queue declared; reports its name and counts.
    QueueDeclareOk(QueueDeclareOk) => "Queue.DeclareOk",
    /// Bind a queue to an exchange.
    QueueBind(QueueBind) => "Queue.Bind",
    /// Queue bound.
    QueueBindOk => "Queue.BindOk",
    /// Remove a queue-to-exchange binding.
    QueueUnbind(QueueUnbind) => "Queue.Unbind",
    /// Queue unbound.
    QueueUnbindOk => "Queue.UnbindOk",
    /// Drop every message currently in a queue.
    QueuePurge(QueuePurge) => "Queue.Purge",
    /// Queue purged; reports how many messages were dropped.
    QueuePurgeOk(MessageCount) => "Queue.PurgeOk",
    /// Delete a queue.
    QueueDelete(QueueDelete) => "Queue.Delete",
    /// Queue deleted; reports how many messages were dropped.
    QueueDeleteOk(MessageCount) => "Queue.DeleteOk",

    /// Set the prefetch window.
    BasicQos(BasicQos) => "Basic.Qos",
    /// Prefetch window accepted.
    BasicQosOk => "Basic.QosOk",
    /// Register a consumer on a queue.
    BasicConsume(BasicConsume) => "Basic.Consume",
    /// Consumer registered under the reported tag.
    BasicConsumeOk(ConsumerTag) => "Basic.ConsumeOk",
    /// Cancel a consumer.
    BasicCancel(BasicCancel) => "Basic.Cancel",
    /// Consumer cancelled.
    BasicCancelOk(ConsumerTag) => "Basic.CancelOk",
    /// Publish a message; carries content.
    BasicPublish(BasicPublish) => "Basic.Publish",
    /// Broker returned an unroutable mandatory message; carries content.
    BasicReturn(BasicReturn) => "Basic.Return",
    /// Broker delivered a message to a consumer; carries content.
    BasicDeliver(BasicDeliver) => "Basic.Deliver",
    /// Synchronously fetch one message from a queue.
    BasicGet(BasicGet) => "Basic.Get",
    /// A message follows; carries content.
    BasicGetOk(BasicGetOk) => "Basic.GetOk",
    /// The queue was empty.
    BasicGetEmpty => "Basic.GetEmpty",
    /// Acknowledge one or more deliveries.
    BasicAck(BasicAck) => "Basic.Ack",
    /// Negatively acknowledge one or more deliveries.
    BasicNack(BasicNack) => "Basic.Nack",
    /// Reject a single delivery.
    BasicReject(BasicReject) => "Basic.Reject",
    /// Ask the broker to redeliver unacknowledged messages.
    BasicRecover(BasicRecover) => "Basic.Recover",
    /// Redelivery requested.
    BasicRecoverOk => "Basic.RecoverOk",

    /// Put the channel into publisher-confirmation mode.
    ConfirmSelect(ConfirmSelect) => "Confirm.Select",
    /// Confirmation mode enabled.
    ConfirmSelectOk => "Confirm.SelectOk",

    /// Put the channel into transaction mode.
    TxSelect => "Tx.Select",
    /// Transaction mode enabled.
    TxSelectOk => "Tx.SelectOk",
    /// Commit the current transaction.
    TxCommit => "Tx.Commit",
    /// Transaction committed.
    TxCommitOk => "Tx.CommitOk",
    /// Roll back the current transaction.
    TxRollback => "Tx.Rollback",
    /// Transaction rolled back.
    TxRollbackOk => "Tx.RollbackOk",
}

impl Method {
    /// Symbolic `Class.Method` name.
    #[must_use]
    pub fn name(&self) -> &'static str { self.kind().name() }

    /// Reply code, for the close methods that carry one.
    #[must_use]
    pub fn reply_code(&self) -> Option<u16> {
        match self {
            Self::ConnectionClose(close) | Self::ChannelClose(close) => Some(close.reply_code),
            _ => None,
        }
    }

    /// Reply text, for the close methods that carry one.
    #[must_use]
    pub fn reply_text(&self) -> Option<&str> {
        match self {
            Self::ConnectionClose(close) | Self::ChannelClose(close) => {
                Some(close.reply_text.as_str())
            }
            _ => None,
        }
    }
}

impl MethodKind {
    /// Whether a request of this kind is answered by the broker at all.
    ///
    /// The acknowledgement family is fire-and-forget: sending one never
    /// blocks, and registering replies for one is a caller error.
    #[must_use]
    pub fn expects_reply(self) -> bool {
        !matches!(self, Self::BasicAck | Self::BasicNack | Self::BasicReject)
    }
}

/// Payload of `Connection.Close` and `Channel.Close`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct Close {
    /// Protocol reply code giving the close reason.
    pub reply_code: u16,
    /// Human-readable close reason.
    pub reply_text: String,
    /// Class id of the method that provoked the close, or zero.
    pub class_id: u16,
    /// Method id of the method that provoked the close, or zero.
    pub method_id: u16,
}

impl Close {
    /// A close payload with no provoking method.
    #[must_use]
    pub fn new(reply_code: u16, reply_text: impl Into<String>) -> Self {
        Self {
            reply_code,
            reply_text: reply_text.into(),
            class_id: 0,
            method_id: 0,
        }
    }
}

/// Payload of `Exchange.Declare`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct ExchangeDeclare {
    /// Exchange name.
    pub exchange: String,
    /// Routing behaviour.
    pub kind: ExchangeKind,
    /// Assert existence instead of creating.
    pub passive: bool,
    /// Survive a broker restart.
    pub durable: bool,
    /// Delete once no queue remains bound.
    pub auto_delete: bool,
    /// Only other exchanges may publish to it.
    pub internal: bool,
    /// Do not send a `DeclareOk`.
    pub nowait: bool,
    /// Broker-specific arguments.
    pub arguments: FieldTable,
}

/// Payload of `Exchange.Delete`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct ExchangeDelete {
    /// Exchange name.
    pub exchange: String,
    /// Only delete if no queue is bound.
    pub if_unused: bool,
    /// Do not send a `DeleteOk`.
    pub nowait: bool,
}

/// Payload of `Exchange.Bind` and `Exchange.Unbind`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct ExchangeBind {
    /// Exchange receiving the routed messages.
    pub destination: String,
    /// Exchange the binding routes from.
    pub source: String,
    /// Routing key to (un)bind on.
    pub routing_key: String,
    /// Do not send a confirmation.
    pub nowait: bool,
    /// Broker-specific arguments.
    pub arguments: FieldTable,
}

/// Payload of `Queue.Declare`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct QueueDeclare {
    /// Queue name; empty asks the broker to generate one.
    pub queue: String,
    /// Assert existence instead of creating.
    pub passive: bool,
    /// Survive a broker restart.
    pub durable: bool,
    /// Restrict to this connection and delete with it.
    pub exclusive: bool,
    /// Delete once the last consumer cancels.
    pub auto_delete: bool,
    /// Do not send a `DeclareOk`.
    pub nowait: bool,
    /// Broker-specific arguments.
    pub arguments: FieldTable,
}

/// Payload of `Queue.DeclareOk`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct QueueDeclareOk {
    /// Queue name, echoing or generating the requested one.
    pub queue: String,
    /// Messages currently in the queue.
    pub message_count: u32,
    /// Consumers currently attached to the queue.
    pub consumer_count: u32,
}

/// Payload of `Queue.Bind`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct QueueBind {
    /// Queue to bind.
    pub queue: String,
    /// Exchange to bind to.
    pub exchange: String,
    /// Routing key to bind on.
    pub routing_key: String,
    /// Do not send a `BindOk`.
    pub nowait: bool,
    /// Broker-specific arguments.
    pub arguments: FieldTable,
}

/// Payload of `Queue.Unbind`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct QueueUnbind {
    /// Queue to unbind.
    pub queue: String,
    /// Exchange to unbind from.
    pub exchange: String,
    /// Routing key the binding used.
    pub routing_key: String,
    /// Broker-specific arguments.
    pub arguments: FieldTable,
}

/// Payload of `Queue.Purge`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct QueuePurge {
    /// Queue to purge.
    pub queue: String,
    /// Do not send a `PurgeOk`.
    pub nowait: bool,
}

/// Payload of `Queue.Delete`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct QueueDelete {
    /// Queue to delete.
    pub queue: String,
    /// Only delete if it has no consumers.
    pub if_unused: bool,
    /// Only delete if it holds no messages.
    pub if_empty: bool,
    /// Do not send a `DeleteOk`.
    pub nowait: bool,
}

/// Message count reported by `Queue.PurgeOk` and `Queue.DeleteOk`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct MessageCount(pub u32);

/// Payload of `Basic.Qos`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct BasicQos {
    /// Prefetch window in bytes; zero means no specific limit.
    pub prefetch_size: u32,
    /// Prefetch window in whole messages; zero means no specific limit.
    pub prefetch_count: u16,
    /// Apply to every channel on the connection.
    pub global: bool,
}

/// Payload of `Basic.Consume`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct BasicConsume {
    /// Queue to consume from.
    pub queue: String,
    /// Requested consumer tag; empty asks the broker to generate one.
    pub consumer_tag: String,
    /// Do not deliver messages published on this connection.
    pub no_local: bool,
    /// Deliveries need no acknowledgement.
    pub no_ack: bool,
    /// Request exclusive consumer access to the queue.
    pub exclusive: bool,
    /// Do not send a `ConsumeOk`.
    pub nowait: bool,
    /// Broker-specific arguments.
    pub arguments: FieldTable,
}

/// Payload of `Basic.Cancel`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct BasicCancel {
    /// Consumer to cancel.
    pub consumer_tag: String,
    /// Do not send a `CancelOk`.
    pub nowait: bool,
}

/// Consumer tag reported by `Basic.ConsumeOk` and `Basic.CancelOk`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ConsumerTag(pub String);

/// Payload of `Basic.Publish`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct BasicPublish {
    /// Exchange to publish to; empty names the default exchange.
    pub exchange: String,
    /// Routing key for the message.
    pub routing_key: String,
    /// Return the message if it cannot be routed to a queue.
    pub mandatory: bool,
    /// Return the message if it cannot be delivered immediately (deprecated).
    pub immediate: bool,
}

/// Payload of `Basic.Return`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct BasicReturn {
    /// Why the message came back.
    pub reply_code: u16,
    /// Human-readable reason.
    pub reply_text: String,
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key the message was published with.
    pub routing_key: String,
}

/// Payload of `Basic.Deliver`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct BasicDeliver {
    /// Consumer the message is delivered to.
    pub consumer_tag: String,
    /// Broker-assigned delivery tag, for acknowledgements.
    pub delivery_tag: u64,
    /// The message was delivered before and not acknowledged.
    pub redelivered: bool,
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key the message was published with.
    pub routing_key: String,
}

/// Payload of `Basic.Get`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct BasicGet {
    /// Queue to fetch from.
    pub queue: String,
    /// The fetched message needs no acknowledgement.
    pub no_ack: bool,
}

/// Payload of `Basic.GetOk`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct BasicGetOk {
    /// Broker-assigned delivery tag, for acknowledgements.
    pub delivery_tag: u64,
    /// The message was delivered before and not acknowledged.
    pub redelivered: bool,
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key the message was published with.
    pub routing_key: String,
    /// Messages remaining in the queue after this one.
    pub message_count: u32,
}

/// Payload of `Basic.Ack`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct BasicAck {
    /// Delivery to acknowledge.
    pub delivery_tag: u64,
    /// Acknowledge every delivery up to and including the tag.
    pub multiple: bool,
}

/// Payload of `Basic.Nack`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct BasicNack {
    /// Delivery to negatively acknowledge.
    pub delivery_tag: u64,
    /// Apply to every delivery up to and including the tag.
    pub multiple: bool,
    /// Requeue instead of discarding.
    pub requeue: bool,
}

/// Payload of `Basic.Reject`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct BasicReject {
    /// Delivery to reject.
    pub delivery_tag: u64,
    /// Requeue instead of discarding.
    pub requeue: bool,
}

/// Payload of `Basic.Recover`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct BasicRecover {
    /// Requeue instead of redelivering to the original recipient.
    pub requeue: bool,
}

/// Payload of `Confirm.Select`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ConfirmSelect {
    /// Do not send a `SelectOk`.
    pub nowait: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let method = Method::QueueDeclare(QueueDeclare {
            queue: "q1".into(),
            ..QueueDeclare::default()
        });
        assert_eq!(method.kind(), MethodKind::QueueDeclare);
        assert_eq!(Method::TxSelect.kind(), MethodKind::TxSelect);
    }

    #[test]
    fn names_follow_the_protocol_reference() {
        assert_eq!(MethodKind::BasicQosOk.name(), "Basic.QosOk");
        assert_eq!(MethodKind::ConnectionClose.name(), "Connection.Close");
        assert_eq!(
            Method::ChannelClose(Close::new(406, "precondition failed")).name(),
            "Channel.Close"
        );
    }

    #[test]
    fn close_methods_expose_reply_code_and_text() {
        let close = Method::ChannelClose(Close::new(404, "no queue 'missing'"));
        assert_eq!(close.reply_code(), Some(404));
        assert_eq!(close.reply_text(), Some("no queue 'missing'"));

        let declare = Method::ExchangeDeclareOk;
        assert_eq!(declare.reply_code(), None);
        assert_eq!(declare.reply_text(), None);
    }

    #[test]
    fn acknowledgement_family_never_expects_a_reply() {
        for kind in [
            MethodKind::BasicAck,
            MethodKind::BasicNack,
            MethodKind::BasicReject,
        ] {
            assert!(!kind.expects_reply(), "{} should be fire-and-forget", kind.name());
        }
        assert!(MethodKind::BasicPublish.expects_reply());
        assert!(MethodKind::QueueDeclare.expects_reply());
    }
}
