//! An in-memory broker the driver can connect to.
//!
//! [`FakeBroker`] stands in for a real peer: it answers the methods a
//! connection writes, keeps per-queue message backlogs, and hands tests a
//! handle for priming inbound traffic and inspecting everything the driver
//! sent. Responses queue up when the driver flushes its outbound buffer and
//! arrive on the next read attempt, so a test exercises the same
//! buffer-flush-read rhythm as a session against a live broker.
//!
//! Routing is deliberately simpler than a real broker's: the default
//! exchange routes on the queue name, fanout exchanges route to every
//! binding, and every other exchange kind routes on an exact routing-key
//! match. Exchange-to-exchange bindings are acknowledged but not routed
//! through.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use bincode::{config, encode_to_vec};
use bytes::Bytes;
use lockstep::method::{
    BasicAck, BasicConsume, BasicDeliver, BasicGetOk, BasicNack, BasicPublish, BasicQos,
    BasicReturn, Close, ConsumerTag, Content, ExchangeKind, MessageCount, Method, QueueDeclareOk,
};
use lockstep::transport::{Capabilities, Inbound, IoStatus, Transport, TransportError};
use lockstep::{Connection, Tuning};
use rstest::fixture;

/// One method the driver flushed to the broker.
#[derive(Clone, Debug, PartialEq)]
pub struct SentMethod {
    /// Channel the method was sent on.
    pub channel: u16,
    /// The method itself.
    pub method: Method,
    /// Content attached to it, for content-carrying methods.
    pub content: Option<Content>,
}

struct QueuedMessage {
    exchange: String,
    routing_key: String,
    content: Content,
}

struct Binding {
    queue: String,
    routing_key: String,
}

struct Exchange {
    kind: ExchangeKind,
    bindings: Vec<Binding>,
}

struct BrokerState {
    capabilities: Capabilities,
    queues: HashMap<String, VecDeque<QueuedMessage>>,
    exchanges: HashMap<String, Exchange>,
    consumers: BTreeMap<(u16, String), String>,
    confirming: Vec<u16>,
    publish_seq: HashMap<u16, u64>,
    delivery_tags: HashMap<u16, u64>,
    next_queue_name: u32,
    inbox: VecDeque<Inbound>,
    sent: Vec<SentMethod>,
    unflushed: Vec<(u16, Method, Option<Content>)>,
    outbound_bytes: usize,
    last_qos: Option<BasicQos>,
    read_timeout: Option<Duration>,
    read_attempts: u64,
    nack_next_publish: bool,
    silent: bool,
    link_down: bool,
    shut_down: bool,
}

fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Wire size of a buffered method: its encoding plus the body bytes of any
/// attached content. A stand-in for real framing; the driver only ever
/// compares the total against zero.
fn encoded_len(method: &Method, content: Option<&Content>) -> usize {
    let method_len = encode_to_vec(method, config::standard()).map_or(1, |bytes| bytes.len());
    method_len + content.map_or(0, |content| content.body.len())
}

impl BrokerState {
    fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            queues: HashMap::new(),
            exchanges: HashMap::new(),
            consumers: BTreeMap::new(),
            confirming: Vec::new(),
            publish_seq: HashMap::new(),
            delivery_tags: HashMap::new(),
            next_queue_name: 0,
            inbox: VecDeque::new(),
            sent: Vec::new(),
            unflushed: Vec::new(),
            outbound_bytes: 0,
            last_qos: None,
            read_timeout: None,
            read_attempts: 0,
            nack_next_publish: false,
            silent: false,
            link_down: false,
            shut_down: false,
        }
    }

    fn reply(&mut self, channel: u16, method: Method) {
        self.inbox.push_back(Inbound::method(channel, method));
    }

    fn reply_content(&mut self, channel: u16, method: Method, content: Content) {
        self.inbox.push_back(Inbound::with_content(channel, method, content));
    }

    /// Close `channel` the way a broker reports a channel-level fault, and
    /// forget everything registered on it.
    fn channel_error(&mut self, channel: u16, code: u16, text: String) {
        self.consumers.retain(|(ch, _), _| *ch != channel);
        self.confirming.retain(|ch| *ch != channel);
        self.reply(channel, Method::ChannelClose(Close::new(code, text)));
    }

    fn next_delivery_tag(&mut self, channel: u16) -> u64 {
        let tag = self.delivery_tags.entry(channel).or_insert(0);
        *tag += 1;
        *tag
    }

    /// Hand a routed message to a registered consumer, or park it in the
    /// queue's backlog when nobody is consuming.
    fn place(&mut self, queue: &str, publish: &BasicPublish, content: Content) {
        let consumer = self
            .consumers
            .iter()
            .find(|(_, target)| target.as_str() == queue)
            .map(|((channel, tag), _)| (*channel, tag.clone()));
        if let Some((channel, consumer_tag)) = consumer {
            let delivery_tag = self.next_delivery_tag(channel);
            self.reply_content(
                channel,
                Method::BasicDeliver(BasicDeliver {
                    consumer_tag,
                    delivery_tag,
                    redelivered: false,
                    exchange: publish.exchange.clone(),
                    routing_key: publish.routing_key.clone(),
                }),
                content,
            );
        } else if let Some(backlog) = self.queues.get_mut(queue) {
            backlog.push_back(QueuedMessage {
                exchange: publish.exchange.clone(),
                routing_key: publish.routing_key.clone(),
                content,
            });
        }
    }

    fn route(&mut self, publish: &BasicPublish, content: Content) -> bool {
        if publish.exchange.is_empty() {
            if self.queues.contains_key(&publish.routing_key) {
                let queue = publish.routing_key.clone();
                self.place(&queue, publish, content);
                return true;
            }
            return false;
        }
        let targets: Vec<String> = match self.exchanges.get(&publish.exchange) {
            None => Vec::new(),
            Some(exchange) => exchange
                .bindings
                .iter()
                .filter(|binding| match exchange.kind {
                    ExchangeKind::Fanout => true,
                    _ => binding.routing_key == publish.routing_key,
                })
                .map(|binding| binding.queue.clone())
                .collect(),
        };
        for queue in &targets {
            self.place(queue, publish, content.clone());
        }
        !targets.is_empty()
    }

    fn on_publish(&mut self, channel: u16, publish: &BasicPublish, content: Option<&Content>) {
        if !publish.exchange.is_empty() && !self.exchanges.contains_key(&publish.exchange) {
            self.channel_error(
                channel,
                404,
                format!("NOT_FOUND - no exchange '{}'", publish.exchange),
            );
            return;
        }
        let content = content.cloned().unwrap_or_default();
        let routed = self.route(publish, content.clone());
        if !routed && publish.mandatory {
            self.reply_content(
                channel,
                Method::BasicReturn(BasicReturn {
                    reply_code: 312,
                    reply_text: "NO_ROUTE".into(),
                    exchange: publish.exchange.clone(),
                    routing_key: publish.routing_key.clone(),
                }),
                content,
            );
        }
        if self.confirming.contains(&channel) {
            let seq = self.publish_seq.entry(channel).or_insert(0);
            *seq += 1;
            let delivery_tag = *seq;
            if std::mem::take(&mut self.nack_next_publish) {
                self.reply(
                    channel,
                    Method::BasicNack(BasicNack {
                        delivery_tag,
                        multiple: false,
                        requeue: false,
                    }),
                );
            } else {
                self.reply(
                    channel,
                    Method::BasicAck(BasicAck {
                        delivery_tag,
                        multiple: false,
                    }),
                );
            }
        }
    }

    fn on_consume(&mut self, channel: u16, consume: &BasicConsume) {
        if !self.queues.contains_key(&consume.queue) {
            self.channel_error(channel, 404, format!("NOT_FOUND - no queue '{}'", consume.queue));
            return;
        }
        let tag = consume.consumer_tag.clone();
        if !consume.nowait {
            self.reply(channel, Method::BasicConsumeOk(ConsumerTag(tag.clone())));
        }
        self.consumers.insert((channel, tag.clone()), consume.queue.clone());
        let backlog = self
            .queues
            .get_mut(&consume.queue)
            .map(std::mem::take)
            .unwrap_or_default();
        for message in backlog {
            let delivery_tag = self.next_delivery_tag(channel);
            self.reply_content(
                channel,
                Method::BasicDeliver(BasicDeliver {
                    consumer_tag: tag.clone(),
                    delivery_tag,
                    redelivered: false,
                    exchange: message.exchange,
                    routing_key: message.routing_key,
                }),
                message.content,
            );
        }
    }

    fn respond(&mut self, channel: u16, method: &Method, content: Option<&Content>) {
        if self.silent {
            return;
        }
        match method {
            Method::ConnectionClose(_) => self.reply(0, Method::ConnectionCloseOk),
            Method::ChannelOpen => self.reply(channel, Method::ChannelOpenOk),
            Method::ChannelClose(_) => {
                self.consumers.retain(|(ch, _), _| *ch != channel);
                self.confirming.retain(|ch| *ch != channel);
                self.reply(channel, Method::ChannelCloseOk);
            }
            Method::ExchangeDeclare(declare) => {
                if declare.passive && !self.exchanges.contains_key(&declare.exchange) {
                    self.channel_error(
                        channel,
                        404,
                        format!("NOT_FOUND - no exchange '{}'", declare.exchange),
                    );
                    return;
                }
                self.exchanges
                    .entry(declare.exchange.clone())
                    .or_insert_with(|| Exchange {
                        kind: declare.kind.clone(),
                        bindings: Vec::new(),
                    });
                if !declare.nowait {
                    self.reply(channel, Method::ExchangeDeclareOk);
                }
            }
            Method::ExchangeDelete(delete) => {
                self.exchanges.remove(&delete.exchange);
                if !delete.nowait {
                    self.reply(channel, Method::ExchangeDeleteOk);
                }
            }
            Method::ExchangeBind(bind) => {
                if !bind.nowait {
                    self.reply(channel, Method::ExchangeBindOk);
                }
            }
            Method::ExchangeUnbind(unbind) => {
                if !unbind.nowait {
                    self.reply(channel, Method::ExchangeUnbindOk);
                }
            }
            Method::QueueDeclare(declare) => {
                if declare.passive && !self.queues.contains_key(&declare.queue) {
                    self.channel_error(
                        channel,
                        404,
                        format!("NOT_FOUND - no queue '{}'", declare.queue),
                    );
                    return;
                }
                let name = if declare.queue.is_empty() {
                    self.next_queue_name += 1;
                    format!("amq.gen-{}", self.next_queue_name)
                } else {
                    declare.queue.clone()
                };
                let messages = self.queues.entry(name.clone()).or_default().len();
                let consumers = self
                    .consumers
                    .values()
                    .filter(|queue| queue.as_str() == name)
                    .count();
                if !declare.nowait {
                    self.reply(
                        channel,
                        Method::QueueDeclareOk(QueueDeclareOk {
                            queue: name,
                            message_count: count_u32(messages),
                            consumer_count: count_u32(consumers),
                        }),
                    );
                }
            }
            Method::QueueBind(bind) => {
                if !self.queues.contains_key(&bind.queue) {
                    self.channel_error(channel, 404, format!("NOT_FOUND - no queue '{}'", bind.queue));
                    return;
                }
                if !self.exchanges.contains_key(&bind.exchange) {
                    self.channel_error(
                        channel,
                        404,
                        format!("NOT_FOUND - no exchange '{}'", bind.exchange),
                    );
                    return;
                }
                if let Some(exchange) = self.exchanges.get_mut(&bind.exchange) {
                    exchange.bindings.push(Binding {
                        queue: bind.queue.clone(),
                        routing_key: bind.routing_key.clone(),
                    });
                }
                if !bind.nowait {
                    self.reply(channel, Method::QueueBindOk);
                }
            }
            Method::QueueUnbind(unbind) => {
                if let Some(exchange) = self.exchanges.get_mut(&unbind.exchange) {
                    exchange.bindings.retain(|binding| {
                        binding.queue != unbind.queue || binding.routing_key != unbind.routing_key
                    });
                }
                self.reply(channel, Method::QueueUnbindOk);
            }
            Method::QueuePurge(purge) => {
                if !self.queues.contains_key(&purge.queue) {
                    self.channel_error(channel, 404, format!("NOT_FOUND - no queue '{}'", purge.queue));
                    return;
                }
                let count = self.queues.get_mut(&purge.queue).map_or(0, |backlog| {
                    let count = backlog.len();
                    backlog.clear();
                    count
                });
                if !purge.nowait {
                    self.reply(channel, Method::QueuePurgeOk(MessageCount(count_u32(count))));
                }
            }
            Method::QueueDelete(delete) => {
                let count = self.queues.remove(&delete.queue).map_or(0, |q| q.len());
                self.consumers.retain(|_, queue| *queue != delete.queue);
                for exchange in self.exchanges.values_mut() {
                    exchange.bindings.retain(|binding| binding.queue != delete.queue);
                }
                if !delete.nowait {
                    self.reply(channel, Method::QueueDeleteOk(MessageCount(count_u32(count))));
                }
            }
            Method::BasicQos(qos) => {
                self.last_qos = Some(*qos);
                self.reply(channel, Method::BasicQosOk);
            }
            Method::BasicConsume(consume) => self.on_consume(channel, consume),
            Method::BasicCancel(cancel) => {
                self.consumers.remove(&(channel, cancel.consumer_tag.clone()));
                if !cancel.nowait {
                    self.reply(
                        channel,
                        Method::BasicCancelOk(ConsumerTag(cancel.consumer_tag.clone())),
                    );
                }
            }
            Method::BasicPublish(publish) => self.on_publish(channel, publish, content),
            Method::BasicGet(get) => {
                if !self.queues.contains_key(&get.queue) {
                    self.channel_error(channel, 404, format!("NOT_FOUND - no queue '{}'", get.queue));
                    return;
                }
                let popped = self.queues.get_mut(&get.queue).and_then(VecDeque::pop_front);
                match popped {
                    None => self.reply(channel, Method::BasicGetEmpty),
                    Some(message) => {
                        let remaining =
                            count_u32(self.queues.get(&get.queue).map_or(0, VecDeque::len));
                        let delivery_tag = self.next_delivery_tag(channel);
                        self.reply_content(
                            channel,
                            Method::BasicGetOk(BasicGetOk {
                                delivery_tag,
                                redelivered: false,
                                exchange: message.exchange,
                                routing_key: message.routing_key,
                                message_count: remaining,
                            }),
                            message.content,
                        );
                    }
                }
            }
            Method::BasicRecover(_) => self.reply(channel, Method::BasicRecoverOk),
            Method::ConfirmSelect(select) => {
                if !self.confirming.contains(&channel) {
                    self.confirming.push(channel);
                }
                if !select.nowait {
                    self.reply(channel, Method::ConfirmSelectOk);
                }
            }
            Method::TxSelect => self.reply(channel, Method::TxSelectOk),
            Method::TxCommit => self.reply(channel, Method::TxCommitOk),
            Method::TxRollback => self.reply(channel, Method::TxRollbackOk),
            // Acknowledgements and the driver's halves of close handshakes
            // need no answer; everything else never originates client-side.
            _ => {}
        }
    }
}

struct BrokerTransport {
    state: Rc<RefCell<BrokerState>>,
}

impl Transport for BrokerTransport {
    fn connect(&mut self, _timeout: Duration) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if state.link_down {
            return Err(TransportError::Connect {
                reason: "link down".into(),
            });
        }
        state.inbox.push_back(Inbound::method(0, Method::ConnectionOpenOk));
        Ok(())
    }

    fn read_once(&mut self, sink: &mut Vec<Inbound>) -> Result<IoStatus, TransportError> {
        let mut state = self.state.borrow_mut();
        if state.shut_down {
            return Err(TransportError::Closed);
        }
        if state.link_down {
            return Err(TransportError::Io(io::Error::other("link down")));
        }
        state.read_attempts += 1;
        if state.silent || state.inbox.is_empty() {
            return Ok(IoStatus::TimedOut);
        }
        sink.extend(state.inbox.drain(..));
        Ok(IoStatus::Ready)
    }

    fn write_once(&mut self) -> Result<IoStatus, TransportError> {
        let state = &mut *self.state.borrow_mut();
        if state.shut_down {
            return Err(TransportError::Closed);
        }
        if state.link_down {
            return Err(TransportError::Io(io::Error::other("link down")));
        }
        let unflushed = std::mem::take(&mut state.unflushed);
        state.outbound_bytes = 0;
        for (channel, method, content) in unflushed {
            state.respond(channel, &method, content.as_ref());
            state.sent.push(SentMethod {
                channel,
                method,
                content,
            });
        }
        Ok(IoStatus::Ready)
    }

    fn send_method(
        &mut self,
        channel: u16,
        method: Method,
        content: Option<Content>,
    ) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if state.shut_down {
            return Err(TransportError::Closed);
        }
        state.outbound_bytes += encoded_len(&method, content.as_ref());
        state.unflushed.push((channel, method, content));
        Ok(())
    }

    fn outbound_len(&self) -> usize {
        self.state.borrow().outbound_bytes
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.state.borrow_mut().read_timeout = Some(timeout);
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        self.state.borrow().capabilities
    }

    fn shutdown(&mut self) {
        let mut state = self.state.borrow_mut();
        state.shut_down = true;
        state.unflushed.clear();
        state.outbound_bytes = 0;
    }
}

/// Handle to an in-memory broker, for priming traffic and inspecting what
/// the driver sent.
///
/// Obtained from [`FakeBroker::start`] together with the transport to hand
/// to [`Connection::open`]. The handle stays valid for the whole session.
#[derive(Clone)]
pub struct FakeBroker {
    state: Rc<RefCell<BrokerState>>,
}

impl FakeBroker {
    /// A fresh broker advertising every extension.
    #[must_use]
    pub fn start() -> (Box<dyn Transport>, Self) {
        Self::start_with(Capabilities::default())
    }

    /// A fresh broker advertising exactly `capabilities`.
    #[must_use]
    pub fn start_with(capabilities: Capabilities) -> (Box<dyn Transport>, Self) {
        let state = Rc::new(RefCell::new(BrokerState::new(capabilities)));
        let transport = BrokerTransport {
            state: Rc::clone(&state),
        };
        (Box::new(transport), Self { state })
    }

    /// Everything the driver flushed, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<SentMethod> {
        self.state.borrow().sent.clone()
    }

    /// Names of everything the driver flushed, in order.
    #[must_use]
    pub fn sent_names(&self) -> Vec<&'static str> {
        self.state
            .borrow()
            .sent
            .iter()
            .map(|sent| sent.method.name())
            .collect()
    }

    /// Delivery tags the driver acknowledged, in order.
    #[must_use]
    pub fn acked_tags(&self) -> Vec<u64> {
        self.state
            .borrow()
            .sent
            .iter()
            .filter_map(|sent| match &sent.method {
                Method::BasicAck(ack) => Some(ack.delivery_tag),
                _ => None,
            })
            .collect()
    }

    /// Messages sitting in `queue`, or `None` when it was never declared.
    #[must_use]
    pub fn queue_len(&self, queue: &str) -> Option<usize> {
        self.state.borrow().queues.get(queue).map(VecDeque::len)
    }

    /// Bodies of the messages sitting in `queue`, in order.
    #[must_use]
    pub fn queued_bodies(&self, queue: &str) -> Vec<Bytes> {
        self.state
            .borrow()
            .queues
            .get(queue)
            .map(|backlog| {
                backlog
                    .iter()
                    .map(|message| message.content.body.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The last prefetch window the driver asked for.
    #[must_use]
    pub fn last_qos(&self) -> Option<BasicQos> {
        self.state.borrow().last_qos
    }

    /// The read and write bound the driver configured last.
    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        self.state.borrow().read_timeout
    }

    /// How many times the driver has polled for inbound traffic.
    #[must_use]
    pub fn read_attempts(&self) -> u64 {
        self.state.borrow().read_attempts
    }

    /// Whether the driver tore the transport down.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.state.borrow().shut_down
    }

    /// Queue an arbitrary method for the driver's next read.
    pub fn inject(&self, channel: u16, method: Method, content: Option<Content>) {
        let inbound = match content {
            Some(content) => Inbound::with_content(channel, method, content),
            None => Inbound::method(channel, method),
        };
        self.state.borrow_mut().inbox.push_back(inbound);
    }

    /// Close the connection from the broker side.
    pub fn inject_close(&self, code: u16, text: &str) {
        self.inject(0, Method::ConnectionClose(Close::new(code, text)), None);
    }

    /// Close `channel` from the broker side.
    pub fn inject_channel_close(&self, channel: u16, code: u16, text: &str) {
        self.inject(channel, Method::ChannelClose(Close::new(code, text)), None);
    }

    /// Stop answering: writes still succeed, every read times out.
    pub fn go_silent(&self) {
        self.state.borrow_mut().silent = true;
    }

    /// Fail the link: every read and write reports a stream failure.
    pub fn drop_link(&self) {
        self.state.borrow_mut().link_down = true;
    }

    /// Refuse responsibility for the next confirmed publish.
    pub fn nack_next_publish(&self) {
        self.state.borrow_mut().nack_next_publish = true;
    }
}

/// Connect a fresh driver to a [`FakeBroker`] under default tuning.
///
/// # Panics
/// Panics when the in-memory open handshake fails, which indicates a bug in
/// the driver or the broker stand-in rather than the test.
///
/// ```
/// use lockstep_testing::open_broker;
///
/// let (connection, _broker) = open_broker();
/// assert!(connection.is_open());
/// ```
#[must_use]
pub fn open_broker() -> (Connection, FakeBroker) {
    open_broker_with(Tuning::default())
}

/// Connect a fresh driver to a [`FakeBroker`] under `tuning`.
///
/// # Panics
/// Panics when the in-memory open handshake fails.
#[must_use]
pub fn open_broker_with(tuning: Tuning) -> (Connection, FakeBroker) {
    let (transport, broker) = FakeBroker::start();
    let connection = Connection::open(transport, tuning).expect("fake broker open");
    (connection, broker)
}

/// An open connection and its broker handle, as an rstest fixture.
#[fixture]
pub fn session() -> (Connection, FakeBroker) {
    open_broker()
}
