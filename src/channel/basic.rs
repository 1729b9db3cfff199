//! Publishing, fetching, and acknowledgements.

use bytes::Bytes;
use log::warn;

use super::Channel;
use super::rpc::unexpected_reply;
use crate::error::{Error, Result};
use crate::message::{GetMessage, PublishOutcome};
use crate::method::{
    BasicAck, BasicGet, BasicNack, BasicPublish, BasicQos, BasicRecover, BasicReject, Content,
    Method, MethodKind, Properties,
};

impl Channel {
    /// Publish a message.
    ///
    /// Outside confirmation mode the message is buffered and drained with
    /// no broker verdict, reported as [`PublishOutcome::Sent`]. In
    /// confirmation mode the call blocks for the broker's verdict; the
    /// broker answers every publish one way or the other.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed, when the link fails,
    /// or when the broker refuses the publish by closing the channel.
    pub fn basic_publish(
        &self,
        publish: BasicPublish,
        properties: Properties,
        body: impl Into<Bytes>,
    ) -> Result<PublishOutcome> {
        if publish.immediate {
            warn!("the immediate flag is deprecated; modern brokers reject it");
        }
        let content = Content::new(properties, body);
        if !self.is_confirming() {
            self.send(Method::BasicPublish(publish), Some(content))?;
            return Ok(PublishOutcome::Sent);
        }
        let reply = self.rpc(
            Method::BasicPublish(publish),
            Some(content),
            &[
                MethodKind::BasicAck,
                MethodKind::BasicNack,
                MethodKind::BasicReject,
            ],
        )?;
        match reply.method {
            Method::BasicAck(_) => Ok(PublishOutcome::Acked),
            Method::BasicNack(_) | Method::BasicReject(_) => Ok(PublishOutcome::Nacked),
            other => Err(unexpected_reply(&other)),
        }
    }

    /// Fetch one message synchronously, or `None` when the queue is empty.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed, when the link fails,
    /// or when the broker refuses the fetch by closing the channel.
    pub fn basic_get(&self, get: BasicGet) -> Result<Option<GetMessage>> {
        let reply = self.rpc(
            Method::BasicGet(get),
            None,
            &[MethodKind::BasicGetOk, MethodKind::BasicGetEmpty],
        )?;
        match reply.method {
            Method::BasicGetOk(ok) => {
                let content = reply.content.unwrap_or_default();
                Ok(Some(GetMessage::new(ok, content)))
            }
            Method::BasicGetEmpty => Ok(None),
            other => Err(unexpected_reply(&other)),
        }
    }

    /// Acknowledge a delivery, or with `multiple` every delivery up to and
    /// including `delivery_tag`. Fire-and-forget; the broker never answers.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed or the link fails
    /// while draining.
    pub fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<()> {
        self.send(
            Method::BasicAck(BasicAck {
                delivery_tag,
                multiple,
            }),
            None,
        )
    }

    /// Negatively acknowledge one or more deliveries. Fire-and-forget.
    ///
    /// # Errors
    /// Fails when the broker does not support `Basic.Nack`, when the
    /// channel or connection is closed, or when the link fails while
    /// draining.
    pub fn basic_nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<()> {
        if !self.connection().capabilities().basic_nack {
            return Err(Error::NotSupported("Basic.Nack"));
        }
        self.send(
            Method::BasicNack(BasicNack {
                delivery_tag,
                multiple,
                requeue,
            }),
            None,
        )
    }

    /// Reject a single delivery. Fire-and-forget.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed or the link fails
    /// while draining.
    pub fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.send(
            Method::BasicReject(BasicReject {
                delivery_tag,
                requeue,
            }),
            None,
        )
    }

    /// Set the prefetch window for deliveries on this channel.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed, when the link fails,
    /// or when the broker refuses the window by closing the channel.
    pub fn basic_qos(&self, qos: BasicQos) -> Result<()> {
        self.rpc(Method::BasicQos(qos), None, &[MethodKind::BasicQosOk])?;
        Ok(())
    }

    /// Ask the broker to redeliver every unacknowledged message on this
    /// channel, requeueing them when `requeue` is set.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed, when the link fails,
    /// or when the broker refuses by closing the channel.
    pub fn basic_recover(&self, requeue: bool) -> Result<()> {
        self.rpc(
            Method::BasicRecover(BasicRecover { requeue }),
            None,
            &[MethodKind::BasicRecoverOk],
        )?;
        Ok(())
    }
}
