//! Application-level message and resource objects.
//!
//! [`Message`] is what publishers hand to the cluster; [`Delivery`] is
//! what consumers receive, carrying the routing metadata the broker
//! attached plus the body as zero-copy fragments. [`Exchange`], [`Queue`]
//! and [`Binding`] describe broker resources declaratively; the cluster
//! keeps them in its desired-state mirror and re-declares them after a
//! reconnect.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::content::BasicProperties;
use crate::error::{AmqpError, AmqpResult};
use crate::reactor::{Command, CommandSender};
use crate::types::FieldTable;

/// An outbound message: body plus basic-class properties.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub body: Bytes,
    pub properties: BasicProperties,
}

impl Message {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Message {
            body: body.into(),
            properties: BasicProperties::default(),
        }
    }

    /// A UTF-8 text message with `content_type` set to `text/plain`.
    pub fn text(body: impl Into<String>) -> Self {
        Message {
            body: Bytes::from(body.into().into_bytes()),
            properties: BasicProperties::new().with_content_type("text/plain"),
        }
    }

    pub fn with_properties(mut self, properties: BasicProperties) -> Self {
        self.properties = properties;
        self
    }
}

/// An inbound message body as the sequence of BODY-frame fragments it
/// arrived in. Callers pick their mode: iterate the fragments without
/// copying, or flatten into one buffer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Body {
    fragments: Vec<Bytes>,
}

impl Body {
    pub fn from_fragments(fragments: Vec<Bytes>) -> Self {
        Body { fragments }
    }

    /// Zero-copy view of the fragments.
    pub fn fragments(&self) -> &[Bytes] {
        &self.fragments
    }

    /// Total byte length across fragments.
    pub fn len(&self) -> usize {
        self.fragments.iter().map(Bytes::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The body as one contiguous buffer. Free when the body arrived in a
    /// single fragment; otherwise the fragments are copied once.
    pub fn to_bytes(&self) -> Bytes {
        match self.fragments.len() {
            0 => Bytes::new(),
            1 => self.fragments[0].clone(),
            _ => {
                let mut buf = BytesMut::with_capacity(self.len());
                for fragment in &self.fragments {
                    buf.put_slice(fragment);
                }
                buf.freeze()
            }
        }
    }
}

/// A message delivered to a consumer (or returned by the broker).
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Per-channel monotonic identifier used to acknowledge this delivery.
    pub delivery_tag: u64,
    /// Whether the broker has attempted this delivery before.
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    /// Tag of the consumer this was delivered to; absent for returns.
    pub consumer_tag: Option<String>,
    pub properties: BasicProperties,
    pub body: Body,
    pub(crate) channel_id: u16,
    pub(crate) no_ack: bool,
    pub(crate) acker: Option<CommandSender>,
}

impl Delivery {
    /// Acknowledge this delivery. A no-op for `no_ack` consumers.
    pub fn ack(&self) -> AmqpResult<()> {
        self.send_ack(Command::Ack {
            channel_id: self.channel_id,
            delivery_tag: self.delivery_tag,
            multiple: false,
        })
    }

    /// Negatively acknowledge, optionally requeueing.
    pub fn nack(&self, requeue: bool) -> AmqpResult<()> {
        self.send_ack(Command::Nack {
            channel_id: self.channel_id,
            delivery_tag: self.delivery_tag,
            requeue,
        })
    }

    /// Reject, optionally requeueing.
    pub fn reject(&self, requeue: bool) -> AmqpResult<()> {
        self.send_ack(Command::Reject {
            channel_id: self.channel_id,
            delivery_tag: self.delivery_tag,
            requeue,
        })
    }

    fn send_ack(&self, command: Command) -> AmqpResult<()> {
        if self.no_ack {
            return Ok(());
        }
        let acker = self
            .acker
            .as_ref()
            .ok_or_else(|| AmqpError::invalid_state("delivery is not acknowledgeable"))?;
        acker
            .send(command)
            .map_err(|_| AmqpError::connection_failed("reactor is gone"))
    }
}

/// Exchange types defined by the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeType {
    Direct,
    Fanout,
    Topic,
    Headers,
    Custom(String),
}

impl ExchangeType {
    pub fn as_str(&self) -> &str {
        match self {
            ExchangeType::Direct => "direct",
            ExchangeType::Fanout => "fanout",
            ExchangeType::Topic => "topic",
            ExchangeType::Headers => "headers",
            ExchangeType::Custom(name) => name,
        }
    }
}

/// A declarative exchange definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub name: String,
    pub kind: ExchangeType,
    pub durable: bool,
    /// Assert existence without creating.
    pub passive: bool,
    pub arguments: FieldTable,
}

impl Exchange {
    pub fn new(name: impl Into<String>, kind: ExchangeType) -> Self {
        Exchange {
            name: name.into(),
            kind,
            durable: false,
            passive: false,
            arguments: FieldTable::new(),
        }
    }

    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }
}

/// A declarative queue definition. An empty name asks the broker to
/// generate one; the generated name is filled in on declare-ok.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    /// Assert existence without creating.
    pub passive: bool,
    pub arguments: FieldTable,
}

impl Queue {
    pub fn named(name: impl Into<String>) -> Self {
        Queue {
            name: name.into(),
            durable: false,
            exclusive: false,
            auto_delete: false,
            passive: false,
            arguments: FieldTable::new(),
        }
    }

    /// A broker-named, exclusive, auto-deleted queue.
    pub fn anonymous() -> Self {
        Queue {
            name: String::new(),
            durable: false,
            exclusive: true,
            auto_delete: true,
            passive: false,
            arguments: FieldTable::new(),
        }
    }

    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }
}

/// A queue-to-exchange binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub arguments: FieldTable,
}

impl Binding {
    pub fn new(
        queue: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Binding {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            arguments: FieldTable::new(),
        }
    }
}

/// Any declarable broker resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resource {
    Exchange(Exchange),
    Queue(Queue),
    Binding(Binding),
}

impl From<Exchange> for Resource {
    fn from(value: Exchange) -> Self {
        Resource::Exchange(value)
    }
}

impl From<Queue> for Resource {
    fn from(value: Queue) -> Self {
        Resource::Queue(value)
    }
}

impl From<Binding> for Resource {
    fn from(value: Binding) -> Self {
        Resource::Binding(value)
    }
}

/// Options for `Cluster::publish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishOptions {
    /// Return the message if it cannot be routed.
    pub mandatory: bool,
    /// Return the message if it cannot be delivered immediately.
    pub immediate: bool,
    /// Resolve the publish future only once the broker confirms it.
    pub confirm: bool,
}

/// Per-consumer prefetch limits applied with `basic.qos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qos {
    pub prefetch_size: u32,
    pub prefetch_count: u16,
}

impl Qos {
    pub fn prefetch(count: u16) -> Self {
        Qos {
            prefetch_size: 0,
            prefetch_count: count,
        }
    }
}

/// Callback invoked on the reactor thread for each delivery. Must not
/// block; hand heavy work to your own pool.
pub type DeliveryCallback = Box<dyn Fn(Delivery) + Send>;

/// Options for `Cluster::consume`.
#[derive(Default)]
pub struct ConsumeOptions {
    pub no_ack: bool,
    pub exclusive: bool,
    pub qos: Option<Qos>,
    /// Push-mode callback. When absent, deliveries land on the event
    /// queue for `Cluster::drain`.
    pub on_message: Option<DeliveryCallback>,
}

impl ConsumeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_ack(mut self) -> Self {
        self.no_ack = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn qos(mut self, qos: Qos) -> Self {
        self.qos = Some(qos);
        self
    }

    pub fn on_message(mut self, callback: impl Fn(Delivery) + Send + 'static) -> Self {
        self.on_message = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for ConsumeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumeOptions")
            .field("no_ack", &self.no_ack)
            .field("exclusive", &self.exclusive)
            .field("qos", &self.qos)
            .field("on_message", &self.on_message.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message() {
        let message = Message::text("hello");
        assert_eq!(&message.body[..], b"hello");
        assert_eq!(message.properties.content_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_body_single_fragment_is_zero_copy() {
        let fragment = Bytes::from_static(b"abc");
        let body = Body::from_fragments(vec![fragment.clone()]);
        assert_eq!(body.len(), 3);
        assert_eq!(body.to_bytes(), fragment);
    }

    #[test]
    fn test_body_flattens_fragments() {
        let body = Body::from_fragments(vec![
            Bytes::from_static(b"he"),
            Bytes::from_static(b"ll"),
            Bytes::from_static(b"o"),
        ]);
        assert_eq!(body.len(), 5);
        assert_eq!(&body.to_bytes()[..], b"hello");
    }

    #[test]
    fn test_empty_body() {
        let body = Body::default();
        assert!(body.is_empty());
        assert_eq!(body.to_bytes(), Bytes::new());
    }

    #[test]
    fn test_anonymous_queue() {
        let queue = Queue::anonymous();
        assert!(queue.is_anonymous());
        assert!(queue.exclusive);
        assert!(queue.auto_delete);
        assert!(!Queue::named("jobs").is_anonymous());
    }

    #[test]
    fn test_exchange_type_names() {
        assert_eq!(ExchangeType::Direct.as_str(), "direct");
        assert_eq!(ExchangeType::Topic.as_str(), "topic");
        assert_eq!(ExchangeType::Custom("x-delayed".into()).as_str(), "x-delayed");
    }

    #[test]
    fn test_no_ack_delivery_ack_is_noop() {
        let delivery = Delivery {
            delivery_tag: 1,
            redelivered: false,
            exchange: String::new(),
            routing_key: "t".into(),
            consumer_tag: Some("ct".into()),
            properties: BasicProperties::default(),
            body: Body::default(),
            channel_id: 2,
            no_ack: true,
            acker: None,
        };
        assert!(delivery.ack().is_ok());
    }

    #[test]
    fn test_unackable_delivery_errors() {
        let delivery = Delivery {
            delivery_tag: 1,
            redelivered: false,
            exchange: String::new(),
            routing_key: "t".into(),
            consumer_tag: None,
            properties: BasicProperties::default(),
            body: Body::default(),
            channel_id: 2,
            no_ack: false,
            acker: None,
        };
        assert!(matches!(
            delivery.ack(),
            Err(AmqpError::InvalidState(_))
        ));
    }
}
