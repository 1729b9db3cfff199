//! Queue management.

use super::Channel;
use super::rpc::unexpected_reply;
use crate::error::Result;
use crate::method::{
    Method, MethodKind, QueueBind, QueueDeclare, QueueDeclareOk, QueueDelete, QueuePurge,
    QueueUnbind,
};

impl Channel {
    /// Declare a queue, creating it or asserting it exists.
    ///
    /// The broker's confirmation echoes the queue name (generating one when
    /// the request left it empty) and reports its message and consumer
    /// counts. Returns `None` when `nowait` suppressed the confirmation.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed, when the link fails,
    /// or when the broker refuses the declaration by closing the channel.
    pub fn queue_declare(&self, declare: QueueDeclare) -> Result<Option<QueueDeclareOk>> {
        if declare.nowait {
            self.send(Method::QueueDeclare(declare), None)?;
            return Ok(None);
        }
        let reply = self.rpc(
            Method::QueueDeclare(declare),
            None,
            &[MethodKind::QueueDeclareOk],
        )?;
        match reply.method {
            Method::QueueDeclareOk(ok) => Ok(Some(ok)),
            other => Err(unexpected_reply(&other)),
        }
    }

    /// Bind a queue to an exchange.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed, when the link fails,
    /// or when the broker refuses the binding by closing the channel.
    pub fn queue_bind(&self, bind: QueueBind) -> Result<()> {
        if bind.nowait {
            return self.send(Method::QueueBind(bind), None);
        }
        self.rpc(Method::QueueBind(bind), None, &[MethodKind::QueueBindOk])?;
        Ok(())
    }

    /// Remove a queue-to-exchange binding. The protocol offers no `nowait`
    /// form for this method.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed, when the link fails,
    /// or when the broker refuses by closing the channel.
    pub fn queue_unbind(&self, unbind: QueueUnbind) -> Result<()> {
        self.rpc(Method::QueueUnbind(unbind), None, &[MethodKind::QueueUnbindOk])?;
        Ok(())
    }

    /// Drop every message currently in a queue.
    ///
    /// Returns how many messages were dropped, or `None` when `nowait`
    /// suppressed the confirmation.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed, when the link fails,
    /// or when the broker refuses by closing the channel.
    pub fn queue_purge(&self, purge: QueuePurge) -> Result<Option<u32>> {
        if purge.nowait {
            self.send(Method::QueuePurge(purge), None)?;
            return Ok(None);
        }
        let reply = self.rpc(Method::QueuePurge(purge), None, &[MethodKind::QueuePurgeOk])?;
        match reply.method {
            Method::QueuePurgeOk(count) => Ok(Some(count.0)),
            other => Err(unexpected_reply(&other)),
        }
    }

    /// Delete a queue.
    ///
    /// Returns how many messages were dropped with it, or `None` when
    /// `nowait` suppressed the confirmation.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed, when the link fails,
    /// or when the broker refuses the deletion by closing the channel.
    pub fn queue_delete(&self, delete: QueueDelete) -> Result<Option<u32>> {
        if delete.nowait {
            self.send(Method::QueueDelete(delete), None)?;
            return Ok(None);
        }
        let reply = self.rpc(Method::QueueDelete(delete), None, &[MethodKind::QueueDeleteOk])?;
        match reply.method {
            Method::QueueDeleteOk(count) => Ok(Some(count.0)),
            other => Err(unexpected_reply(&other)),
        }
    }
}
