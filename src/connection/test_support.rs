//! Scripted transport for exercising the driver without a socket.
//!
//! Tests keep a shared handle to the [`Script`]: prime inbound methods,
//! script read outcomes, install an auto-responder, and inspect everything
//! the driver sent.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::config::Tuning;
use crate::connection::Connection;
use crate::method::{Content, Method};
use crate::transport::{Capabilities, Inbound, IoStatus, Transport, TransportError};

/// One scripted outcome for a read attempt, consumed in order.
pub(crate) enum ReadStep {
    /// Hand these methods to the driver and report progress.
    Deliver(Vec<Inbound>),
    /// Report a socket timeout.
    TimedOut,
    /// Fail the stream.
    Fail,
}

/// Auto-responder consulted for every flushed outbound method.
pub(crate) type Responder = Box<dyn FnMut(u16, &Method) -> Vec<Inbound>>;

/// Shared transport state a test scripts and inspects.
pub(crate) struct Script {
    /// Methods the next read attempt delivers ahead of any scripted step.
    pub(crate) inbox: VecDeque<Inbound>,
    /// Scripted read outcomes, consumed once the inbox is empty. An empty
    /// script reads as a timeout.
    pub(crate) reads: VecDeque<ReadStep>,
    /// Every method the driver buffered, in order.
    pub(crate) sent: Vec<(u16, Method, Option<Content>)>,
    /// Methods buffered and not yet flushed by a write attempt.
    unflushed: Vec<(u16, Method)>,
    /// Replies generated per flushed method, delivered via the inbox.
    pub(crate) responder: Option<Responder>,
    /// Most recent read timeout the driver configured.
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) capabilities: Capabilities,
    pub(crate) shut_down: bool,
    /// Fail every write attempt once set.
    pub(crate) fail_writes: bool,
}

impl Script {
    fn new() -> Self {
        Self {
            inbox: VecDeque::new(),
            reads: VecDeque::new(),
            sent: Vec::new(),
            unflushed: Vec::new(),
            responder: None,
            read_timeout: None,
            capabilities: Capabilities::default(),
            shut_down: false,
            fail_writes: false,
        }
    }

    /// Kinds of the methods sent so far, for order assertions.
    pub(crate) fn sent_names(&self) -> Vec<&'static str> {
        self.sent.iter().map(|(_, method, _)| method.name()).collect()
    }
}

/// Transport half handed to the connection; state lives in the [`Script`].
pub(crate) struct ScriptedTransport {
    script: Rc<RefCell<Script>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> (Box<dyn Transport>, Rc<RefCell<Script>>) {
        let script = Rc::new(RefCell::new(Script::new()));
        let transport = Self {
            script: Rc::clone(&script),
        };
        (Box::new(transport), script)
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, _timeout: Duration) -> Result<(), TransportError> {
        Ok(())
    }

    fn read_once(&mut self, sink: &mut Vec<Inbound>) -> Result<IoStatus, TransportError> {
        let mut script = self.script.borrow_mut();
        if script.shut_down {
            return Err(TransportError::Closed);
        }
        if !script.inbox.is_empty() {
            sink.extend(script.inbox.drain(..));
            return Ok(IoStatus::Ready);
        }
        match script.reads.pop_front() {
            Some(ReadStep::Deliver(batch)) => {
                sink.extend(batch);
                Ok(IoStatus::Ready)
            }
            Some(ReadStep::TimedOut) | None => Ok(IoStatus::TimedOut),
            Some(ReadStep::Fail) => Err(TransportError::Protocol("scripted failure".into())),
        }
    }

    fn write_once(&mut self) -> Result<IoStatus, TransportError> {
        let script = &mut *self.script.borrow_mut();
        if script.shut_down {
            return Err(TransportError::Closed);
        }
        if script.fail_writes {
            return Err(TransportError::Io(std::io::Error::other(
                "scripted write failure",
            )));
        }
        let flushed = std::mem::take(&mut script.unflushed);
        if let Some(responder) = script.responder.as_mut() {
            for (channel, method) in &flushed {
                let replies = responder(*channel, method);
                script.inbox.extend(replies);
            }
        }
        Ok(IoStatus::Ready)
    }

    fn send_method(
        &mut self,
        channel: u16,
        method: Method,
        content: Option<Content>,
    ) -> Result<(), TransportError> {
        let mut script = self.script.borrow_mut();
        if script.shut_down {
            return Err(TransportError::Closed);
        }
        script.unflushed.push((channel, method.clone()));
        script.sent.push((channel, method, content));
        Ok(())
    }

    fn outbound_len(&self) -> usize {
        self.script.borrow().unflushed.len()
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.script.borrow_mut().read_timeout = Some(timeout);
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        self.script.borrow().capabilities
    }

    fn shutdown(&mut self) {
        let mut script = self.script.borrow_mut();
        script.shut_down = true;
        script.unflushed.clear();
    }
}

/// An open connection over a scripted transport, default tuning.
pub(crate) fn open_scripted() -> (Connection, Rc<RefCell<Script>>) {
    open_scripted_with(Tuning::default())
}

/// An open connection over a scripted transport.
pub(crate) fn open_scripted_with(tuning: Tuning) -> (Connection, Rc<RefCell<Script>>) {
    let (transport, script) = ScriptedTransport::new();
    script
        .borrow_mut()
        .inbox
        .push_back(Inbound::method(0, Method::ConnectionOpenOk));
    let connection = Connection::open(transport, tuning).expect("scripted open");
    (connection, script)
}

/// Responder answering channel and connection lifecycle handshakes.
pub(crate) fn lifecycle_responder() -> Responder {
    Box::new(|channel, method| match method {
        Method::ChannelOpen => vec![Inbound::method(channel, Method::ChannelOpenOk)],
        Method::ChannelClose(_) => vec![Inbound::method(channel, Method::ChannelCloseOk)],
        Method::ConnectionClose(_) => vec![Inbound::method(0, Method::ConnectionCloseOk)],
        _ => Vec::new(),
    })
}
