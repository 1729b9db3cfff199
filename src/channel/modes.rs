//! Channel-wide modes: publisher confirmation and transactions.

use log::debug;

use super::Channel;
use crate::error::{Error, Result};
use crate::method::{ConfirmSelect, Method, MethodKind};

impl Channel {
    /// Put the channel into publisher-confirmation mode.
    ///
    /// From then on every [`basic_publish`](Self::basic_publish) blocks for
    /// the broker's verdict. The mode cannot be switched off; asking again
    /// is a no-op. Refused up front when the broker did not advertise the
    /// confirmation extensions, instead of sending a method it would kill
    /// the connection over.
    ///
    /// # Errors
    /// Fails when the broker lacks the extension, when the channel or
    /// connection is closed, or when the selection handshake fails.
    pub fn confirm_delivery(&self) -> Result<()> {
        let capabilities = self.connection().capabilities();
        if !capabilities.publisher_confirms {
            return Err(Error::NotSupported("publisher confirms"));
        }
        if !capabilities.basic_nack {
            return Err(Error::NotSupported("Basic.Nack"));
        }
        if self.is_confirming() {
            debug!("channel {} is already in confirmation mode", self.number);
            return Ok(());
        }
        self.rpc(
            Method::ConfirmSelect(ConfirmSelect { nowait: false }),
            None,
            &[MethodKind::ConfirmSelectOk],
        )?;
        let mut inner = self.conn.inner.borrow_mut();
        if let Some(core) = inner.channel_core_mut(self.number, self.epoch) {
            core.confirming = true;
        }
        Ok(())
    }

    /// Put the channel into transaction mode.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed or the handshake
    /// fails.
    pub fn tx_select(&self) -> Result<()> {
        self.rpc(Method::TxSelect, None, &[MethodKind::TxSelectOk])?;
        Ok(())
    }

    /// Commit the current transaction.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed or the handshake
    /// fails.
    pub fn tx_commit(&self) -> Result<()> {
        self.rpc(Method::TxCommit, None, &[MethodKind::TxCommitOk])?;
        Ok(())
    }

    /// Roll back the current transaction.
    ///
    /// # Errors
    /// Fails when the channel or connection is closed or the handshake
    /// fails.
    pub fn tx_rollback(&self) -> Result<()> {
        self.rpc(Method::TxRollback, None, &[MethodKind::TxRollbackOk])?;
        Ok(())
    }
}
