//! Exchange management.
//!
//! Each operation takes its full method payload so callers spell out every
//! flag the protocol offers; `..Default::default()` covers the common case.
//! With `nowait` set the broker sends no confirmation and the call returns
//! once the request has drained.

use super::Channel;
use crate::error::Result;
use crate::method::{ExchangeBind, ExchangeDeclare, ExchangeDelete, Method, MethodKind};

impl Channel {
    /// Declare an exchange, creating it or asserting it exists.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed, when the link fails,
    /// or when the broker refuses the declaration by closing the channel.
    pub fn exchange_declare(&self, declare: ExchangeDeclare) -> Result<()> {
        if declare.nowait {
            return self.send(Method::ExchangeDeclare(declare), None);
        }
        self.rpc(
            Method::ExchangeDeclare(declare),
            None,
            &[MethodKind::ExchangeDeclareOk],
        )?;
        Ok(())
    }

    /// Delete an exchange.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed, when the link fails,
    /// or when the broker refuses the deletion by closing the channel.
    pub fn exchange_delete(&self, delete: ExchangeDelete) -> Result<()> {
        if delete.nowait {
            return self.send(Method::ExchangeDelete(delete), None);
        }
        self.rpc(
            Method::ExchangeDelete(delete),
            None,
            &[MethodKind::ExchangeDeleteOk],
        )?;
        Ok(())
    }

    /// Bind one exchange to another.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed, when the link fails,
    /// or when the broker refuses the binding by closing the channel.
    pub fn exchange_bind(&self, bind: ExchangeBind) -> Result<()> {
        if bind.nowait {
            return self.send(Method::ExchangeBind(bind), None);
        }
        self.rpc(Method::ExchangeBind(bind), None, &[MethodKind::ExchangeBindOk])?;
        Ok(())
    }

    /// Remove an exchange-to-exchange binding.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed, when the link fails,
    /// or when the broker refuses by closing the channel.
    pub fn exchange_unbind(&self, unbind: ExchangeBind) -> Result<()> {
        if unbind.nowait {
            return self.send(Method::ExchangeUnbind(unbind), None);
        }
        self.rpc(
            Method::ExchangeUnbind(unbind),
            None,
            &[MethodKind::ExchangeUnbindOk],
        )?;
        Ok(())
    }
}
