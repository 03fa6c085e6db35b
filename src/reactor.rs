//! The I/O reactor.
//!
//! One reactor instance runs on its own dedicated thread inside a
//! current-thread tokio runtime and exclusively owns every piece of
//! connection and channel state. Application threads never touch that
//! state: they submit [`Command`]s through a queue and receive
//! completions through oneshot handles, and inbound deliveries either
//! invoke the consumer callback on the reactor thread or land on the
//! event queue.
//!
//! The loop services, in order: deferred channel-close bookkeeping,
//! commands stashed during reconnect backoff, the outbound flush, and
//! then a readiness wait across the command queue, the socket and a one
//! second maintenance tick (heartbeat generation and watchdog).
//!
//! Synchronous RPCs run inline: while a reply is awaited, inbound frames
//! keep being dispatched, so deliveries and flow control never stall
//! behind a pending declare. Commands execute strictly in submission
//! order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;

use crate::channel::{AssembledContent, Channel, ChannelState};
use crate::cluster::{ClusterOptions, NodeDefinition};
use crate::connection::{Connection, ConnectionOptions, ConnectionState};
use crate::content::{BasicProperties, ContentHeader};
use crate::error::{AmqpError, AmqpResult};
use crate::frame::{split_body, Frame, FramePayload};
use crate::message::{Body, Delivery, Message, PublishOptions, Qos, Queue, Resource};
use crate::methods::{
    BasicAck, BasicCancel, BasicConsume, BasicNack, BasicPublish, BasicQos, BasicReject,
    ChannelClose, ConfirmSelect, ExchangeDeclare, Method, QueueBind, QueueDeclare, CHANNEL_ERROR,
    COMMAND_INVALID, PRECONDITION_FAILED, REPLY_SUCCESS, UNEXPECTED_FRAME,
};
use crate::tracer::FrameTracer;
use crate::transport::TcpTransport;
use crate::types::FieldTable;

/// The channel used for declares and publishes.
const COMMAND_CHANNEL: u16 = 1;

const BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// A connection that stayed open this long resets its node's backoff.
const STABLE_UPTIME: Duration = Duration::from_secs(60);

pub(crate) type CommandSender = mpsc::UnboundedSender<Command>;

/// A consumer as the caller requested it. The `id` preserves the
/// caller's consumer identity across reconnects even when the broker
/// assigns a fresh tag.
pub(crate) struct ConsumerSpec {
    pub id: uuid::Uuid,
    pub queue: Queue,
    pub no_ack: bool,
    pub exclusive: bool,
    pub qos: Option<Qos>,
    pub on_message: Option<Box<dyn Fn(Delivery) + Send>>,
}

struct ConsumerState {
    spec: ConsumerSpec,
    channel_id: Option<u16>,
    actual_tag: Option<String>,
    cancelled: bool,
}

/// Commands submitted by application threads.
pub(crate) enum Command {
    Declare {
        resource: Resource,
        done: oneshot::Sender<AmqpResult<String>>,
    },
    Publish {
        exchange: String,
        routing_key: String,
        message: Message,
        options: PublishOptions,
        done: oneshot::Sender<AmqpResult<()>>,
    },
    Consume {
        spec: ConsumerSpec,
        done: oneshot::Sender<AmqpResult<String>>,
    },
    CancelConsumer {
        consumer_id: uuid::Uuid,
        done: oneshot::Sender<AmqpResult<()>>,
    },
    Ack {
        channel_id: u16,
        delivery_tag: u64,
        multiple: bool,
    },
    Nack {
        channel_id: u16,
        delivery_tag: u64,
        requeue: bool,
    },
    Reject {
        channel_id: u16,
        delivery_tag: u64,
        requeue: bool,
    },
    Shutdown {
        done: oneshot::Sender<AmqpResult<()>>,
    },
}

impl Command {
    /// Resolve this command's completion handle with a failure.
    fn fail(self, error: impl Fn() -> AmqpError) {
        match self {
            Command::Declare { done, .. } => {
                let _ = done.send(Err(error()));
            }
            Command::Publish { done, .. } => {
                let _ = done.send(Err(error()));
            }
            Command::Consume { done, .. } => {
                let _ = done.send(Err(error()));
            }
            Command::CancelConsumer { done, .. } => {
                let _ = done.send(Err(error()));
            }
            Command::Shutdown { done } => {
                let _ = done.send(Ok(()));
            }
            Command::Ack { .. } | Command::Nack { .. } | Command::Reject { .. } => {}
        }
    }
}

/// Events surfaced to the application through the event queue.
#[derive(Debug)]
pub enum Event {
    /// A message arrived for a pull-mode consumer.
    Delivery(Delivery),
    /// The broker returned an unroutable mandatory/immediate publish.
    Returned {
        reply_code: u16,
        reply_text: String,
        exchange: String,
        routing_key: String,
        properties: BasicProperties,
        body: Body,
    },
    /// A consumer was cancelled (broker-initiated or unrecoverable).
    ConsumerCancelled { consumer_tag: String },
    /// The connection failed; a reconnect follows if the error allows.
    ConnectionLost { error: String },
    /// A fresh connection is open and desired state is restored.
    Reconnected,
}

/// A broker-initiated channel close noticed during dispatch, handled once
/// control returns to the main loop.
struct ClosedByBroker {
    channel_id: u16,
    code: u16,
    text: String,
    class_id: u16,
    method_id: u16,
}

impl ClosedByBroker {
    fn to_error(&self) -> AmqpError {
        AmqpError::RemoteChannel {
            code: self.code,
            text: self.text.clone(),
            class_id: self.class_id,
            method_id: self.method_id,
        }
    }
}

/// Per-connection mutable state, alive between connect and teardown.
struct Live {
    conn: Connection,
    channels: HashMap<u16, Channel>,
    next_channel: u16,
    channel_max: u16,
}

impl Live {
    fn new(conn: Connection) -> Self {
        let channel_max = conn.tuning().effective_channel_max();
        Live {
            conn,
            channels: HashMap::new(),
            next_channel: 2,
            channel_max,
        }
    }

    fn channel_mut(&mut self, id: u16) -> AmqpResult<&mut Channel> {
        self.channels.get_mut(&id).ok_or_else(|| {
            AmqpError::protocol(CHANNEL_ERROR, format!("no such channel {}", id))
        })
    }

    /// Pick an unused channel id above the command channel.
    fn allocate_channel_id(&mut self) -> AmqpResult<u16> {
        let span = self.channel_max.saturating_sub(1).max(1);
        for _ in 0..span {
            let id = self.next_channel;
            self.next_channel = if self.next_channel >= self.channel_max {
                2
            } else {
                self.next_channel + 1
            };
            if !self.channels.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(AmqpError::invalid_state("all channel ids are in use"))
    }
}

enum Flow {
    Continue,
    Shutdown,
}

/// The reactor: node selection, reconnect policy, command execution and
/// frame dispatch, all on one thread.
pub(crate) struct Reactor {
    nodes: Vec<NodeDefinition>,
    options: ClusterOptions,
    commands: mpsc::UnboundedReceiver<Command>,
    command_tx: CommandSender,
    events: mpsc::UnboundedSender<Event>,
    tracer: Option<Arc<dyn FrameTracer>>,
    resources: Vec<Resource>,
    consumers: Vec<ConsumerState>,
    /// Whether `confirm.select` must be restored on the command channel.
    confirm_publishes: bool,
    node_index: usize,
    current_node: usize,
    backoff: Vec<Duration>,
    stash: VecDeque<Command>,
    pending_closed: Vec<ClosedByBroker>,
}

impl Reactor {
    pub(crate) fn new(
        nodes: Vec<NodeDefinition>,
        options: ClusterOptions,
        commands: mpsc::UnboundedReceiver<Command>,
        command_tx: CommandSender,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let tracer = options.log_frames.clone();
        let backoff = vec![BACKOFF_INITIAL; nodes.len()];
        Reactor {
            nodes,
            options,
            commands,
            command_tx,
            events,
            tracer,
            resources: Vec::new(),
            consumers: Vec::new(),
            confirm_publishes: false,
            node_index: 0,
            current_node: 0,
            backoff,
            stash: VecDeque::new(),
            pending_closed: Vec::new(),
        }
    }

    /// Reactor main loop: connect, serve, reconnect until shutdown or an
    /// unrecoverable failure.
    pub(crate) async fn run(mut self, ready: oneshot::Sender<AmqpResult<()>>) {
        let mut ready = Some(ready);
        loop {
            let mut live = match self.connect_and_restore().await {
                Ok(Some(live)) => live,
                Ok(None) => {
                    // shutdown requested before a connection was up
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Err(AmqpError::invalid_state(
                            "shut down before the first connection opened",
                        )));
                    }
                    break;
                }
                Err(err) => {
                    log::error!("giving up on cluster: {}", err);
                    self.notify_loss(&err);
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Err(err));
                    }
                    break;
                }
            };

            if let Some(tx) = ready.take() {
                let _ = tx.send(Ok(()));
            } else {
                let _ = self.events.send(Event::Reconnected);
            }

            let connected_at = Instant::now();
            match self.serve(&mut live).await {
                Ok(()) => break,
                Err(err) => {
                    log::warn!("connection lost: {}", err);
                    if connected_at.elapsed() >= STABLE_UPTIME {
                        self.backoff[self.current_node] = BACKOFF_INITIAL;
                    }
                    self.teardown(&mut live, &err).await;
                    let recoverable = err.recoverable();
                    self.notify_loss(&err);
                    if !recoverable {
                        break;
                    }
                }
            }
        }
        self.fail_pending_commands();
    }

    // -- connect & restore --

    /// Round-robin over nodes with per-node exponential backoff until a
    /// connection opens and the desired state is restored. `Ok(None)`
    /// means shutdown was requested while waiting.
    async fn connect_and_restore(&mut self) -> AmqpResult<Option<Live>> {
        loop {
            let idx = self.node_index % self.nodes.len();
            self.node_index += 1;
            self.current_node = idx;
            let node = self.nodes[idx].clone();

            log::info!("connecting to {}", node);
            match self.try_connect(&node).await {
                Ok(live) => return Ok(Some(live)),
                Err(err) if !err.recoverable() => return Err(err),
                Err(err) => {
                    let delay = self.next_backoff(idx);
                    log::warn!(
                        "connect to {} failed ({}), retrying in {:.1}s",
                        node,
                        err,
                        delay.as_secs_f64()
                    );
                    if self.sleep_or_shutdown(delay).await {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn next_backoff(&mut self, idx: usize) -> Duration {
        let base = self.backoff[idx];
        self.backoff[idx] = (base * 2).min(BACKOFF_CAP);
        base.mul_f64(rand::thread_rng().gen_range(0.75..1.25))
    }

    /// Sleep through the backoff window while staying responsive to
    /// shutdown. Other commands submitted meanwhile are stashed and
    /// replayed once connected. Returns true when shutdown was requested.
    async fn sleep_or_shutdown(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                cmd = self.commands.recv() => match cmd {
                    None => return true,
                    Some(Command::Shutdown { done }) => {
                        let _ = done.send(Ok(()));
                        return true;
                    }
                    Some(other) => self.stash.push_back(other),
                },
            }
        }
    }

    async fn try_connect(&mut self, node: &NodeDefinition) -> AmqpResult<Live> {
        let conn_options = ConnectionOptions {
            user: node.user.clone(),
            password: node.password.clone(),
            virtual_host: node.virtual_host.clone(),
            heartbeat: self.options.heartbeat,
            frame_max: self.options.frame_max,
            connect_timeout: self.options.connect_timeout,
            ..ConnectionOptions::default()
        };
        let transport =
            TcpTransport::connect(&node.host, node.port, self.options.connect_timeout).await?;
        let conn = Connection::open(Box::new(transport), &conn_options, self.tracer.clone()).await?;

        let mut live = Live::new(conn);
        self.ensure_command_channel(&mut live).await?;
        self.restore_desired(&mut live).await?;
        Ok(live)
    }

    /// Re-declare resources, re-apply confirm mode and re-subscribe
    /// consumers on a fresh connection, in declaration order.
    async fn restore_desired(&mut self, live: &mut Live) -> AmqpResult<()> {
        let resources = self.resources.clone();
        for resource in &resources {
            self.do_declare(live, resource).await?;
        }
        if self.confirm_publishes {
            self.enable_confirms(live).await?;
        }
        for index in 0..self.consumers.len() {
            if self.consumers[index].cancelled {
                continue;
            }
            if let Err(err) = self.establish_consumer(live, index).await {
                if is_connection_fatal(&err) {
                    return Err(err);
                }
                let state = &mut self.consumers[index];
                log::error!(
                    "could not re-subscribe consumer on queue '{}': {}",
                    state.spec.queue.name,
                    err
                );
                state.cancelled = true;
                let tag = state.actual_tag.clone().unwrap_or_default();
                let _ = self.events.send(Event::ConsumerCancelled { consumer_tag: tag });
            }
        }
        Ok(())
    }

    async fn ensure_command_channel(&mut self, live: &mut Live) -> AmqpResult<()> {
        if live
            .channels
            .get(&COMMAND_CHANNEL)
            .map(Channel::is_open)
            .unwrap_or(false)
        {
            return Ok(());
        }
        live.channels.remove(&COMMAND_CHANNEL);
        let mut channel = Channel::new(COMMAND_CHANNEL);
        channel.state = ChannelState::Opening;
        live.channels.insert(COMMAND_CHANNEL, channel);
        self.rpc(live, COMMAND_CHANNEL, Method::ChannelOpen).await?;
        live.channel_mut(COMMAND_CHANNEL)?.state = ChannelState::Open;
        // confirm mode is per channel incarnation
        if self.confirm_publishes {
            self.enable_confirms(live).await?;
        }
        Ok(())
    }

    async fn enable_confirms(&mut self, live: &mut Live) -> AmqpResult<()> {
        self.rpc(
            live,
            COMMAND_CHANNEL,
            Method::ConfirmSelect(ConfirmSelect { no_wait: false }),
        )
        .await?;
        live.channel_mut(COMMAND_CHANNEL)?.confirm_mode = true;
        Ok(())
    }

    // -- synchronous RPC --

    /// Send a synchronous method and wait for its reply, dispatching every
    /// unrelated inbound frame while waiting. Bounded by the configured
    /// RPC timeout; a late reply is discarded by the dispatcher.
    async fn rpc(&mut self, live: &mut Live, channel_id: u16, method: Method) -> AmqpResult<Method> {
        let expected = method.replies();
        debug_assert!(!expected.is_empty(), "rpc on an asynchronous method");
        live.channel_mut(channel_id)?.begin_rpc(expected)?;
        live.conn
            .send_now(&[Frame::method(channel_id, method)], false)
            .await?;

        let deadline = tokio::time::Instant::now() + self.options.rpc_timeout;
        loop {
            let frame = match tokio::time::timeout_at(deadline, live.conn.read_frame()).await {
                Ok(result) => result?,
                Err(_) => {
                    if let Ok(channel) = live.channel_mut(channel_id) {
                        channel.abort_rpc();
                    }
                    return Err(AmqpError::timeout(format!(
                        "no reply on channel {} within {:?}",
                        channel_id, self.options.rpc_timeout
                    )));
                }
            };

            if frame.channel == channel_id {
                if let FramePayload::Method(method) = &frame.payload {
                    let ident = method.ident();
                    if let Ok(channel) = live.channel_mut(channel_id) {
                        if channel.complete_rpc(ident) {
                            return Ok(method.clone());
                        }
                    }
                }
            }
            self.dispatch_frame(live, frame).await?;
            if let Some(pos) = self
                .pending_closed
                .iter()
                .position(|c| c.channel_id == channel_id)
            {
                let closed = self.pending_closed.remove(pos);
                return Err(closed.to_error());
            }
        }
    }

    // -- the serve loop --

    /// Serve one live connection until shutdown (`Ok`) or loss (`Err`).
    async fn serve(&mut self, live: &mut Live) -> AmqpResult<()> {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if let Some(closed) = self.pending_closed.pop() {
                self.on_channel_closed(live, closed).await?;
                continue;
            }
            if let Some(cmd) = self.stash.pop_front() {
                if let Flow::Shutdown = self.exec_command(live, cmd).await? {
                    self.graceful_close(live).await;
                    return Ok(());
                }
                continue;
            }
            live.conn.flush().await?;

            tokio::select! {
                biased;
                cmd = self.commands.recv() => match cmd {
                    None => {
                        // every handle is gone; close out and stop
                        self.graceful_close(live).await;
                        return Ok(());
                    }
                    Some(cmd) => {
                        if let Flow::Shutdown = self.exec_command(live, cmd).await? {
                            self.graceful_close(live).await;
                            return Ok(());
                        }
                    }
                },
                frame = live.conn.read_frame() => {
                    let frame = frame?;
                    self.dispatch_frame(live, frame).await?;
                }
                _ = tick.tick() => {
                    live.conn.maintain_heartbeat()?;
                }
            }
        }
    }

    // -- command execution --

    async fn exec_command(&mut self, live: &mut Live, command: Command) -> AmqpResult<Flow> {
        match command {
            Command::Declare { resource, done } => {
                let result = self.do_declare(live, &resource).await;
                if result.is_ok() {
                    self.remember_resource(&resource);
                }
                finish(done, result)
            }
            Command::Publish {
                exchange,
                routing_key,
                message,
                options,
                done,
            } => {
                let mut done = Some(done);
                let result = self
                    .do_publish(live, &exchange, &routing_key, message, options, &mut done)
                    .await;
                match result {
                    Ok(()) => Ok(Flow::Continue),
                    Err(err) if is_connection_fatal(&err) => {
                        if let Some(done) = done.take() {
                            let _ = done.send(Err(err.replicate()));
                        }
                        Err(err)
                    }
                    Err(err) => {
                        log::warn!("publish to '{}' failed: {}", exchange, err);
                        if let Some(done) = done.take() {
                            let _ = done.send(Err(err));
                        }
                        Ok(Flow::Continue)
                    }
                }
            }
            Command::Consume { spec, done } => {
                self.consumers.push(ConsumerState {
                    spec,
                    channel_id: None,
                    actual_tag: None,
                    cancelled: false,
                });
                let index = self.consumers.len() - 1;
                let result = self.establish_consumer(live, index).await;
                if result.is_err() {
                    self.consumers.remove(index);
                }
                finish(done, result)
            }
            Command::CancelConsumer { consumer_id, done } => {
                let result = self.do_cancel_consumer(live, consumer_id).await;
                finish(done, result)
            }
            Command::Ack {
                channel_id,
                delivery_tag,
                multiple,
            } => {
                self.send_ack_method(
                    live,
                    channel_id,
                    Method::BasicAck(BasicAck {
                        delivery_tag,
                        multiple,
                    }),
                )?;
                Ok(Flow::Continue)
            }
            Command::Nack {
                channel_id,
                delivery_tag,
                requeue,
            } => {
                self.send_ack_method(
                    live,
                    channel_id,
                    Method::BasicNack(BasicNack {
                        delivery_tag,
                        multiple: false,
                        requeue,
                    }),
                )?;
                Ok(Flow::Continue)
            }
            Command::Reject {
                channel_id,
                delivery_tag,
                requeue,
            } => {
                self.send_ack_method(
                    live,
                    channel_id,
                    Method::BasicReject(BasicReject {
                        delivery_tag,
                        requeue,
                    }),
                )?;
                Ok(Flow::Continue)
            }
            Command::Shutdown { done } => {
                let _ = done.send(Ok(()));
                Ok(Flow::Shutdown)
            }
        }
    }

    async fn do_declare(&mut self, live: &mut Live, resource: &Resource) -> AmqpResult<String> {
        self.ensure_command_channel(live).await?;
        match resource {
            Resource::Exchange(exchange) => {
                self.rpc(
                    live,
                    COMMAND_CHANNEL,
                    Method::ExchangeDeclare(ExchangeDeclare {
                        exchange: exchange.name.clone(),
                        kind: exchange.kind.as_str().to_string(),
                        passive: exchange.passive,
                        durable: exchange.durable,
                        no_wait: false,
                        arguments: exchange.arguments.clone(),
                    }),
                )
                .await?;
                Ok(exchange.name.clone())
            }
            Resource::Queue(queue) => {
                let reply = self.declare_queue(live, COMMAND_CHANNEL, queue).await?;
                Ok(reply)
            }
            Resource::Binding(binding) => {
                self.rpc(
                    live,
                    COMMAND_CHANNEL,
                    Method::QueueBind(QueueBind {
                        queue: binding.queue.clone(),
                        exchange: binding.exchange.clone(),
                        routing_key: binding.routing_key.clone(),
                        no_wait: false,
                        arguments: binding.arguments.clone(),
                    }),
                )
                .await?;
                Ok(binding.queue.clone())
            }
        }
    }

    async fn declare_queue(
        &mut self,
        live: &mut Live,
        channel_id: u16,
        queue: &Queue,
    ) -> AmqpResult<String> {
        let reply = self
            .rpc(
                live,
                channel_id,
                Method::QueueDeclare(QueueDeclare {
                    queue: queue.name.clone(),
                    passive: queue.passive,
                    durable: queue.durable,
                    exclusive: queue.exclusive,
                    auto_delete: queue.auto_delete,
                    no_wait: false,
                    arguments: queue.arguments.clone(),
                }),
            )
            .await?;
        match reply {
            Method::QueueDeclareOk(ok) => Ok(ok.queue),
            other => Err(AmqpError::protocol(
                COMMAND_INVALID,
                format!("queue.declare answered by {}", other.name()),
            )),
        }
    }

    fn remember_resource(&mut self, resource: &Resource) {
        let duplicate = self.resources.iter().any(|known| match (known, resource) {
            (Resource::Exchange(a), Resource::Exchange(b)) => a.name == b.name,
            (Resource::Queue(a), Resource::Queue(b)) => {
                !a.name.is_empty() && a.name == b.name
            }
            (Resource::Binding(a), Resource::Binding(b)) => {
                a.queue == b.queue && a.exchange == b.exchange && a.routing_key == b.routing_key
            }
            _ => false,
        });
        if !duplicate {
            self.resources.push(resource.clone());
        }
    }

    async fn do_publish(
        &mut self,
        live: &mut Live,
        exchange: &str,
        routing_key: &str,
        message: Message,
        options: PublishOptions,
        done: &mut Option<oneshot::Sender<AmqpResult<()>>>,
    ) -> AmqpResult<()> {
        self.ensure_command_channel(live).await?;
        if options.confirm && !live.channel_mut(COMMAND_CHANNEL)?.confirm_mode {
            self.enable_confirms(live).await?;
            self.confirm_publishes = true;
        }

        let frame_max = live.conn.tuning().effective_frame_max();
        let mut frames = Vec::with_capacity(2 + message.body.len() / frame_max as usize);
        frames.push(Frame::method(
            COMMAND_CHANNEL,
            Method::BasicPublish(BasicPublish {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                mandatory: options.mandatory,
                immediate: options.immediate,
            }),
        ));
        frames.push(Frame::header(
            COMMAND_CHANNEL,
            ContentHeader::new(message.body.len() as u64, message.properties),
        ));
        for fragment in split_body(message.body, frame_max) {
            frames.push(Frame::body(COMMAND_CHANNEL, fragment));
        }

        let channel = live.channel_mut(COMMAND_CHANNEL)?;
        let done = done
            .take()
            .ok_or_else(|| AmqpError::invalid_state("publish completion already resolved"))?;
        if options.confirm {
            let seq = channel.next_publish_seq();
            channel.record_unconfirmed(seq, done);
        } else {
            let _ = done.send(Ok(()));
        }

        if channel.flow_paused() {
            channel.buffer_publish(frames);
        } else {
            live.conn.enqueue(&frames, false)?;
        }
        Ok(())
    }

    /// Open a dedicated channel for a consumer, apply its QoS, declare
    /// its queue and subscribe. Returns the broker-assigned consumer tag.
    async fn establish_consumer(&mut self, live: &mut Live, index: usize) -> AmqpResult<String> {
        let channel_id = live.allocate_channel_id()?;
        let mut channel = Channel::new(channel_id);
        channel.state = ChannelState::Opening;
        live.channels.insert(channel_id, channel);

        let result = self.subscribe_on(live, channel_id, index).await;
        match result {
            Ok(tag) => {
                let state = &mut self.consumers[index];
                state.channel_id = Some(channel_id);
                state.actual_tag = Some(tag.clone());
                if let Some(channel) = live.channels.get_mut(&channel_id) {
                    channel.consumer_tag = Some(tag.clone());
                }
                Ok(tag)
            }
            Err(err) => {
                live.channels.remove(&channel_id);
                Err(err)
            }
        }
    }

    async fn subscribe_on(
        &mut self,
        live: &mut Live,
        channel_id: u16,
        index: usize,
    ) -> AmqpResult<String> {
        self.rpc(live, channel_id, Method::ChannelOpen).await?;
        live.channel_mut(channel_id)?.state = ChannelState::Open;

        let (queue_spec, qos, no_ack, exclusive) = {
            let spec = &self.consumers[index].spec;
            (
                spec.queue.clone(),
                spec.qos,
                spec.no_ack,
                spec.exclusive,
            )
        };

        if let Some(qos) = qos {
            self.rpc(
                live,
                channel_id,
                Method::BasicQos(BasicQos {
                    prefetch_size: qos.prefetch_size,
                    prefetch_count: qos.prefetch_count,
                    global: false,
                }),
            )
            .await?;
        }

        let queue_name = self.declare_queue(live, channel_id, &queue_spec).await?;

        let reply = self
            .rpc(
                live,
                channel_id,
                Method::BasicConsume(BasicConsume {
                    queue: queue_name,
                    consumer_tag: String::new(),
                    no_local: false,
                    no_ack,
                    exclusive,
                    no_wait: false,
                    arguments: FieldTable::new(),
                }),
            )
            .await?;
        match reply {
            Method::BasicConsumeOk(ok) if !ok.consumer_tag.is_empty() => Ok(ok.consumer_tag),
            Method::BasicConsumeOk(_) => Err(AmqpError::protocol(
                PRECONDITION_FAILED,
                "broker returned an empty consumer tag",
            )),
            other => Err(AmqpError::protocol(
                COMMAND_INVALID,
                format!("basic.consume answered by {}", other.name()),
            )),
        }
    }

    async fn do_cancel_consumer(
        &mut self,
        live: &mut Live,
        consumer_id: uuid::Uuid,
    ) -> AmqpResult<()> {
        let index = self
            .consumers
            .iter()
            .position(|c| c.spec.id == consumer_id)
            .ok_or_else(|| AmqpError::invalid_state("unknown consumer"))?;

        let (channel_id, tag) = {
            let state = &self.consumers[index];
            (state.channel_id, state.actual_tag.clone())
        };
        if let (Some(channel_id), Some(tag)) = (channel_id, tag) {
            self.rpc(
                live,
                channel_id,
                Method::BasicCancel(BasicCancel {
                    consumer_tag: tag,
                    no_wait: false,
                }),
            )
            .await?;
            self.rpc(
                live,
                channel_id,
                Method::ChannelClose(ChannelClose {
                    reply_code: REPLY_SUCCESS,
                    reply_text: "consumer cancelled".into(),
                    class_id: 0,
                    method_id: 0,
                }),
            )
            .await?;
            live.channels.remove(&channel_id);
        }
        self.consumers.remove(index);
        Ok(())
    }

    /// Queue an ack-family method for a delivery. The channel may be gone
    /// after a reconnect; the broker redelivers in that case, so the
    /// method is dropped silently.
    fn send_ack_method(
        &mut self,
        live: &mut Live,
        channel_id: u16,
        method: Method,
    ) -> AmqpResult<()> {
        match live.channels.get(&channel_id) {
            Some(channel) if channel.is_open() => {
                live.conn.enqueue(&[Frame::method(channel_id, method)], false)
            }
            _ => {
                log::debug!(
                    "dropping {} for stale channel {}",
                    method.name(),
                    channel_id
                );
                Ok(())
            }
        }
    }

    // -- inbound dispatch --

    /// Dispatch one inbound frame. Connection-fatal conditions return
    /// `Err`; broker-initiated channel closes are queued for the main
    /// loop.
    async fn dispatch_frame(&mut self, live: &mut Live, frame: Frame) -> AmqpResult<()> {
        match frame.payload {
            FramePayload::Heartbeat => Ok(()),
            FramePayload::Method(method) => {
                if frame.channel == 0 {
                    self.on_connection_method(live, method).await
                } else {
                    self.on_channel_method(live, frame.channel, method).await
                }
            }
            FramePayload::Header(header) => {
                let channel = match live.channels.get_mut(&frame.channel) {
                    Some(channel) => channel,
                    None => {
                        // late content for a channel that was just closed
                        log::debug!("dropping header frame for closed channel {}", frame.channel);
                        return Ok(());
                    }
                };
                if let Some(content) = channel.accept_header(header)? {
                    self.deliver_content(frame.channel, content);
                }
                Ok(())
            }
            FramePayload::Body(fragment) => {
                let channel = match live.channels.get_mut(&frame.channel) {
                    Some(channel) => channel,
                    None => {
                        log::debug!("dropping body frame for closed channel {}", frame.channel);
                        return Ok(());
                    }
                };
                if let Some(content) = channel.accept_body(fragment)? {
                    self.deliver_content(frame.channel, content);
                }
                Ok(())
            }
        }
    }

    async fn on_connection_method(&mut self, live: &mut Live, method: Method) -> AmqpResult<()> {
        match method {
            Method::ConnectionClose(close) => {
                let _ = live
                    .conn
                    .send_now(&[Frame::method(0, Method::ConnectionCloseOk)], true)
                    .await;
                Err(AmqpError::RemoteConnection {
                    code: close.reply_code,
                    text: close.reply_text,
                    class_id: close.class_id,
                    method_id: close.method_id,
                })
            }
            Method::ConnectionCloseOk => {
                log::debug!("stray connection.close-ok");
                Ok(())
            }
            other => Err(AmqpError::protocol(
                COMMAND_INVALID,
                format!("{} on channel 0 outside handshake", other.name()),
            )),
        }
    }

    async fn on_channel_method(
        &mut self,
        live: &mut Live,
        channel_id: u16,
        method: Method,
    ) -> AmqpResult<()> {
        if let Method::ChannelClose(close) = method {
            log::warn!(
                "broker closed channel {}: {} {}",
                channel_id,
                close.reply_code,
                close.reply_text
            );
            let _ = live
                .conn
                .send_now(&[Frame::method(channel_id, Method::ChannelCloseOk)], true)
                .await;
            if let Some(mut channel) = live.channels.remove(&channel_id) {
                channel.state = ChannelState::Closed;
                channel.abort_rpc();
                channel.abort_content();
                let failure = ClosedByBroker {
                    channel_id,
                    code: close.reply_code,
                    text: close.reply_text.clone(),
                    class_id: close.class_id,
                    method_id: close.method_id,
                };
                channel.fail_confirms(|| failure.to_error());
                self.pending_closed.push(failure);
            }
            return Ok(());
        }

        let channel = match live.channels.get_mut(&channel_id) {
            Some(channel) => channel,
            None => {
                // e.g. a delivery racing our channel close
                log::debug!(
                    "dropping {} for closed channel {}",
                    method.name(),
                    channel_id
                );
                return Ok(());
            }
        };
        if channel.expecting_content() {
            return Err(AmqpError::protocol(
                UNEXPECTED_FRAME,
                format!(
                    "channel {}: {} while a content header/body was expected",
                    channel_id,
                    method.name()
                ),
            ));
        }

        match method {
            method @ (Method::BasicDeliver(_) | Method::BasicReturn(_) | Method::BasicGetOk(_)) => {
                channel.start_content(method)
            }
            Method::ChannelFlow(flow) => {
                let resumed = channel.set_flow(flow.active);
                live.conn.enqueue(
                    &[Frame::method(
                        channel_id,
                        Method::ChannelFlowOk(crate::methods::ChannelFlowOk {
                            active: flow.active,
                        }),
                    )],
                    true,
                )?;
                for burst in resumed {
                    live.conn.enqueue(&burst, false)?;
                }
                Ok(())
            }
            Method::BasicAck(ack) => {
                if channel.confirm_mode {
                    channel.resolve_confirms(ack.delivery_tag, ack.multiple, || Ok(()));
                } else {
                    log::warn!("basic.ack on non-confirm channel {}", channel_id);
                }
                Ok(())
            }
            Method::BasicNack(nack) => {
                if channel.confirm_mode {
                    channel.resolve_confirms(nack.delivery_tag, nack.multiple, || {
                        Err(AmqpError::protocol(
                            PRECONDITION_FAILED,
                            "publish rejected by broker",
                        ))
                    });
                } else {
                    log::warn!("basic.nack on non-confirm channel {}", channel_id);
                }
                Ok(())
            }
            Method::BasicCancel(cancel) => {
                log::warn!("broker cancelled consumer '{}'", cancel.consumer_tag);
                if !cancel.no_wait {
                    live.conn.enqueue(
                        &[Frame::method(
                            channel_id,
                            Method::BasicCancelOk(crate::methods::BasicCancelOk {
                                consumer_tag: cancel.consumer_tag.clone(),
                            }),
                        )],
                        false,
                    )?;
                }
                if let Some(state) = self
                    .consumers
                    .iter_mut()
                    .find(|c| c.actual_tag.as_deref() == Some(cancel.consumer_tag.as_str()))
                {
                    state.cancelled = true;
                    state.channel_id = None;
                }
                let _ = self.events.send(Event::ConsumerCancelled {
                    consumer_tag: cancel.consumer_tag,
                });
                Ok(())
            }
            method if method.reply_to().is_some() => {
                // reply to an RPC that timed out locally; handled and
                // discarded, wire state stays consistent
                log::debug!(
                    "discarding late reply {} on channel {}",
                    method.name(),
                    channel_id
                );
                Ok(())
            }
            other => Err(AmqpError::protocol(
                UNEXPECTED_FRAME,
                format!("unexpected {} on channel {}", other.name(), channel_id),
            )),
        }
    }

    /// Route a completed inbound message to its consumer callback or the
    /// event queue.
    fn deliver_content(&mut self, channel_id: u16, content: AssembledContent) {
        let body = Body::from_fragments(content.fragments);
        let properties = content.header.properties;
        match content.method {
            Method::BasicDeliver(deliver) => {
                let consumer = self
                    .consumers
                    .iter()
                    .find(|c| c.channel_id == Some(channel_id));
                let no_ack = consumer.map(|c| c.spec.no_ack).unwrap_or(true);
                let delivery = Delivery {
                    delivery_tag: deliver.delivery_tag,
                    redelivered: deliver.redelivered,
                    exchange: deliver.exchange,
                    routing_key: deliver.routing_key,
                    consumer_tag: Some(deliver.consumer_tag),
                    properties,
                    body,
                    channel_id,
                    no_ack,
                    acker: Some(self.command_tx.clone()),
                };
                match consumer.and_then(|c| c.spec.on_message.as_ref()) {
                    Some(callback) => callback(delivery),
                    None => {
                        let _ = self.events.send(Event::Delivery(delivery));
                    }
                }
            }
            Method::BasicGetOk(get_ok) => {
                let delivery = Delivery {
                    delivery_tag: get_ok.delivery_tag,
                    redelivered: get_ok.redelivered,
                    exchange: get_ok.exchange,
                    routing_key: get_ok.routing_key,
                    consumer_tag: None,
                    properties,
                    body,
                    channel_id,
                    no_ack: false,
                    acker: Some(self.command_tx.clone()),
                };
                let _ = self.events.send(Event::Delivery(delivery));
            }
            Method::BasicReturn(ret) => {
                let _ = self.events.send(Event::Returned {
                    reply_code: ret.reply_code,
                    reply_text: ret.reply_text,
                    exchange: ret.exchange,
                    routing_key: ret.routing_key,
                    properties,
                    body,
                });
            }
            other => {
                log::error!("content completed for non-content method {}", other.name());
            }
        }
    }

    /// React to a broker-initiated channel close once back in the main
    /// loop: the command channel reopens lazily, a consumer channel is
    /// re-established transparently.
    async fn on_channel_closed(&mut self, live: &mut Live, closed: ClosedByBroker) -> AmqpResult<()> {
        if closed.channel_id == COMMAND_CHANNEL {
            return Ok(());
        }
        let index = match self
            .consumers
            .iter()
            .position(|c| c.channel_id == Some(closed.channel_id))
        {
            Some(index) => index,
            None => return Ok(()),
        };
        {
            let state = &mut self.consumers[index];
            state.channel_id = None;
            state.actual_tag = None;
        }
        match self.establish_consumer(live, index).await {
            Ok(tag) => {
                log::info!(
                    "consumer re-subscribed after channel close ({} {}), new tag '{}'",
                    closed.code,
                    closed.text,
                    tag
                );
                Ok(())
            }
            Err(err) if is_connection_fatal(&err) => Err(err),
            Err(err) => {
                log::error!("consumer lost after channel close: {}", err);
                let state = &mut self.consumers[index];
                state.cancelled = true;
                let _ = self.events.send(Event::ConsumerCancelled {
                    consumer_tag: state.actual_tag.clone().unwrap_or_default(),
                });
                Ok(())
            }
        }
    }

    // -- teardown --

    async fn graceful_close(&mut self, live: &mut Live) {
        for channel in live.channels.values_mut() {
            channel.fail_confirms(|| AmqpError::connection_failed("client shutting down"));
        }
        if let Err(err) = live.conn.close_ok().await {
            log::debug!("close handshake failed: {}", err);
        }
    }

    async fn teardown(&mut self, live: &mut Live, cause: &AmqpError) {
        for channel in live.channels.values_mut() {
            channel.abort_rpc();
            channel.abort_content();
            channel.fail_confirms(|| cause.replicate());
        }
        for consumer in &mut self.consumers {
            consumer.channel_id = None;
            consumer.actual_tag = None;
        }
        // on our own protocol violation, tell the broker why before
        // dropping the socket
        if let AmqpError::Protocol { code, text } = cause {
            if live.conn.state() == ConnectionState::Open {
                let _ = live.conn.close(*code, text).await;
            }
        }
    }

    fn notify_loss(&mut self, error: &AmqpError) {
        let _ = self.events.send(Event::ConnectionLost {
            error: error.to_string(),
        });
        if let Some(on_fail) = &self.options.on_fail {
            on_fail(error);
        }
    }

    /// Fail everything still queued once the reactor stops.
    fn fail_pending_commands(&mut self) {
        self.commands.close();
        for cmd in self.stash.drain(..) {
            cmd.fail(|| AmqpError::connection_failed("reactor stopped"));
        }
        while let Ok(cmd) = self.commands.try_recv() {
            cmd.fail(|| AmqpError::connection_failed("reactor stopped"));
        }
    }
}

/// Resolve a completion handle, escalating connection-fatal errors to
/// the serve loop after the caller has been told.
fn finish<T>(done: oneshot::Sender<AmqpResult<T>>, result: AmqpResult<T>) -> AmqpResult<Flow> {
    match result {
        Ok(value) => {
            let _ = done.send(Ok(value));
            Ok(Flow::Continue)
        }
        Err(err) if is_connection_fatal(&err) => {
            let _ = done.send(Err(err.replicate()));
            Err(err)
        }
        Err(err) => {
            let _ = done.send(Err(err));
            Ok(Flow::Continue)
        }
    }
}

fn is_connection_fatal(err: &AmqpError) -> bool {
    matches!(
        err,
        AmqpError::ConnectionFailed(_)
            | AmqpError::Io(_)
            | AmqpError::Protocol { .. }
            | AmqpError::RemoteConnection { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::MockBroker;

    async fn live_with_channel_max(channel_max: u16) -> Live {
        let (transport, server) = MockBroker::pair();
        let broker = tokio::spawn(async move {
            let mut broker = server;
            broker
                .run_handshake_tuned(channel_max, 131_072, 0)
                .await;
        });
        let conn = Connection::open(
            Box::new(transport),
            &ConnectionOptions::default(),
            None,
        )
        .await
        .unwrap();
        broker.await.unwrap();
        Live::new(conn)
    }

    #[tokio::test]
    async fn test_allocate_channel_ids_skip_command_channel() {
        // ids wrap within 2..=channel_max, never touching channel 1
        let mut live = live_with_channel_max(4).await;
        assert_eq!(live.channel_max, 4);
        for expected in [2u16, 3, 4] {
            let id = live.allocate_channel_id().unwrap();
            assert_eq!(id, expected);
            live.channels.insert(id, Channel::new(id));
        }
        assert!(live.allocate_channel_id().is_err());

        live.channels.remove(&3);
        assert_eq!(live.allocate_channel_id().unwrap(), 3);
    }

    #[test]
    fn test_command_fail_resolves_handles() {
        let (tx, mut rx) = oneshot::channel();
        let cmd = Command::Declare {
            resource: Resource::Queue(Queue::anonymous()),
            done: tx,
        };
        cmd.fail(|| AmqpError::connection_failed("stopped"));
        assert!(rx.try_recv().unwrap().is_err());
    }

    #[test]
    fn test_connection_fatal_classification() {
        assert!(is_connection_fatal(&AmqpError::connection_failed("x")));
        assert!(is_connection_fatal(&AmqpError::protocol(505, "x")));
        assert!(!is_connection_fatal(&AmqpError::timeout("x")));
        assert!(!is_connection_fatal(&AmqpError::RemoteChannel {
            code: 404,
            text: "NOT_FOUND".into(),
            class_id: 0,
            method_id: 0,
        }));
    }
}
