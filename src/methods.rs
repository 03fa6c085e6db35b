//! The AMQP 0-9-1 method registry.
//!
//! Every method the protocol defines is a variant of [`Method`], a tagged
//! sum type dispatched on the `(class_id, method_id)` pair. The registry
//! offers the four operations the rest of the crate needs:
//!
//! - [`Method::decode`]: parse a method frame payload, failing with
//!   `UNEXPECTED_FRAME` (505) on an unknown identifier;
//! - [`Method::to_payload`]: serialize a method back into a frame payload;
//! - [`Method::static_content`]: the precomputed payload for methods whose
//!   argument section is byte-identical every time;
//! - [`Method::replies`] / [`Method::reply_to`]: the synchronous
//!   request/reply relation used for RPC correlation.
//!
//! Bit fields pack left-to-right into octets in declaration order; a new
//! octet starts whenever a non-bit field intervenes. Reserved fields are
//! written as zero/empty and ignored on read.

use bytes::Bytes;

use crate::codec::{Decoder, Encoder};
use crate::error::{AmqpError, AmqpResult};
use crate::types::FieldTable;

/// `(class_id, method_id)` pair identifying a method on the wire.
pub type MethodIdent = (u16, u16);

// AMQP reply codes.
pub const REPLY_SUCCESS: u16 = 200;
pub const CONTENT_TOO_LARGE: u16 = 311;
pub const NO_CONSUMERS: u16 = 313;
pub const CONNECTION_FORCED: u16 = 320;
pub const INVALID_PATH: u16 = 402;
pub const ACCESS_REFUSED: u16 = 403;
pub const NOT_FOUND: u16 = 404;
pub const RESOURCE_LOCKED: u16 = 405;
pub const PRECONDITION_FAILED: u16 = 406;
pub const FRAME_ERROR: u16 = 501;
pub const SYNTAX_ERROR: u16 = 502;
pub const COMMAND_INVALID: u16 = 503;
pub const CHANNEL_ERROR: u16 = 504;
pub const UNEXPECTED_FRAME: u16 = 505;
pub const RESOURCE_ERROR: u16 = 506;
pub const NOT_ALLOWED: u16 = 530;
pub const NOT_IMPLEMENTED: u16 = 540;
pub const INTERNAL_ERROR: u16 = 541;

/// Reply codes that are fatal for the whole connection.
pub const HARD_ERROR: [u16; 11] = [
    CONNECTION_FORCED,
    INVALID_PATH,
    FRAME_ERROR,
    SYNTAX_ERROR,
    COMMAND_INVALID,
    CHANNEL_ERROR,
    UNEXPECTED_FRAME,
    RESOURCE_ERROR,
    NOT_ALLOWED,
    NOT_IMPLEMENTED,
    INTERNAL_ERROR,
];

/// Reply codes that close only the channel they arrive on.
pub const SOFT_ERROR: [u16; 6] = [
    CONTENT_TOO_LARGE,
    NO_CONSUMERS,
    ACCESS_REFUSED,
    NOT_FOUND,
    RESOURCE_LOCKED,
    PRECONDITION_FAILED,
];

// connection class (10)

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStart {
    pub version_major: u8,
    pub version_minor: u8,
    pub server_properties: FieldTable,
    /// Space-separated list of SASL mechanisms.
    pub mechanisms: Vec<u8>,
    pub locales: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStartOk {
    pub client_properties: FieldTable,
    pub mechanism: String,
    pub response: Vec<u8>,
    pub locale: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSecure {
    pub challenge: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSecureOk {
    pub response: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionTune {
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionTuneOk {
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionOpen {
    pub virtual_host: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionClose {
    pub reply_code: u16,
    pub reply_text: String,
    pub class_id: u16,
    pub method_id: u16,
}

// channel class (20)

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFlow {
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFlowOk {
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelClose {
    pub reply_code: u16,
    pub reply_text: String,
    pub class_id: u16,
    pub method_id: u16,
}

// exchange class (40)

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeDeclare {
    pub exchange: String,
    pub kind: String,
    pub passive: bool,
    pub durable: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeDelete {
    pub exchange: String,
    pub if_unused: bool,
    pub no_wait: bool,
}

// queue class (50)

#[derive(Debug, Clone, PartialEq)]
pub struct QueueDeclare {
    pub queue: String,
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueDeclareOk {
    pub queue: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueBind {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuePurge {
    pub queue: String,
    pub no_wait: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuePurgeOk {
    pub message_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueDelete {
    pub queue: String,
    pub if_unused: bool,
    pub if_empty: bool,
    pub no_wait: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueDeleteOk {
    pub message_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueUnbind {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub arguments: FieldTable,
}

// basic class (60)

#[derive(Debug, Clone, PartialEq)]
pub struct BasicQos {
    pub prefetch_size: u32,
    pub prefetch_count: u16,
    pub global: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicConsume {
    pub queue: String,
    pub consumer_tag: String,
    pub no_local: bool,
    pub no_ack: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicConsumeOk {
    pub consumer_tag: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicCancel {
    pub consumer_tag: String,
    pub no_wait: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicCancelOk {
    pub consumer_tag: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicPublish {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicReturn {
    pub reply_code: u16,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicDeliver {
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicGet {
    pub queue: String,
    pub no_ack: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicGetOk {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub message_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicAck {
    pub delivery_tag: u64,
    pub multiple: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicReject {
    pub delivery_tag: u64,
    pub requeue: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicNack {
    pub delivery_tag: u64,
    pub multiple: bool,
    pub requeue: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicRecover {
    pub requeue: bool,
}

// confirm class (85)

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmSelect {
    pub no_wait: bool,
}

/// Every AMQP 0-9-1 method this client can speak or understand.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    ConnectionStart(ConnectionStart),
    ConnectionStartOk(ConnectionStartOk),
    ConnectionSecure(ConnectionSecure),
    ConnectionSecureOk(ConnectionSecureOk),
    ConnectionTune(ConnectionTune),
    ConnectionTuneOk(ConnectionTuneOk),
    ConnectionOpen(ConnectionOpen),
    ConnectionOpenOk,
    ConnectionClose(ConnectionClose),
    ConnectionCloseOk,
    ChannelOpen,
    ChannelOpenOk,
    ChannelFlow(ChannelFlow),
    ChannelFlowOk(ChannelFlowOk),
    ChannelClose(ChannelClose),
    ChannelCloseOk,
    ExchangeDeclare(ExchangeDeclare),
    ExchangeDeclareOk,
    ExchangeDelete(ExchangeDelete),
    ExchangeDeleteOk,
    QueueDeclare(QueueDeclare),
    QueueDeclareOk(QueueDeclareOk),
    QueueBind(QueueBind),
    QueueBindOk,
    QueuePurge(QueuePurge),
    QueuePurgeOk(QueuePurgeOk),
    QueueDelete(QueueDelete),
    QueueDeleteOk(QueueDeleteOk),
    QueueUnbind(QueueUnbind),
    QueueUnbindOk,
    BasicQos(BasicQos),
    BasicQosOk,
    BasicConsume(BasicConsume),
    BasicConsumeOk(BasicConsumeOk),
    BasicCancel(BasicCancel),
    BasicCancelOk(BasicCancelOk),
    BasicPublish(BasicPublish),
    BasicReturn(BasicReturn),
    BasicDeliver(BasicDeliver),
    BasicGet(BasicGet),
    BasicGetOk(BasicGetOk),
    BasicGetEmpty,
    BasicAck(BasicAck),
    BasicReject(BasicReject),
    BasicRecoverAsync(BasicRecover),
    BasicRecover(BasicRecover),
    BasicRecoverOk,
    BasicNack(BasicNack),
    TxSelect,
    TxSelectOk,
    TxCommit,
    TxCommitOk,
    TxRollback,
    TxRollbackOk,
    ConfirmSelect(ConfirmSelect),
    ConfirmSelectOk,
}

impl Method {
    /// The `(class_id, method_id)` pair of this method.
    pub fn ident(&self) -> MethodIdent {
        match self {
            Method::ConnectionStart(_) => (10, 10),
            Method::ConnectionStartOk(_) => (10, 11),
            Method::ConnectionSecure(_) => (10, 20),
            Method::ConnectionSecureOk(_) => (10, 21),
            Method::ConnectionTune(_) => (10, 30),
            Method::ConnectionTuneOk(_) => (10, 31),
            Method::ConnectionOpen(_) => (10, 40),
            Method::ConnectionOpenOk => (10, 41),
            Method::ConnectionClose(_) => (10, 50),
            Method::ConnectionCloseOk => (10, 51),
            Method::ChannelOpen => (20, 10),
            Method::ChannelOpenOk => (20, 11),
            Method::ChannelFlow(_) => (20, 20),
            Method::ChannelFlowOk(_) => (20, 21),
            Method::ChannelClose(_) => (20, 40),
            Method::ChannelCloseOk => (20, 41),
            Method::ExchangeDeclare(_) => (40, 10),
            Method::ExchangeDeclareOk => (40, 11),
            Method::ExchangeDelete(_) => (40, 20),
            Method::ExchangeDeleteOk => (40, 21),
            Method::QueueDeclare(_) => (50, 10),
            Method::QueueDeclareOk(_) => (50, 11),
            Method::QueueBind(_) => (50, 20),
            Method::QueueBindOk => (50, 21),
            Method::QueuePurge(_) => (50, 30),
            Method::QueuePurgeOk(_) => (50, 31),
            Method::QueueDelete(_) => (50, 40),
            Method::QueueDeleteOk(_) => (50, 41),
            Method::QueueUnbind(_) => (50, 50),
            Method::QueueUnbindOk => (50, 51),
            Method::BasicQos(_) => (60, 10),
            Method::BasicQosOk => (60, 11),
            Method::BasicConsume(_) => (60, 20),
            Method::BasicConsumeOk(_) => (60, 21),
            Method::BasicCancel(_) => (60, 30),
            Method::BasicCancelOk(_) => (60, 31),
            Method::BasicPublish(_) => (60, 40),
            Method::BasicReturn(_) => (60, 50),
            Method::BasicDeliver(_) => (60, 60),
            Method::BasicGet(_) => (60, 70),
            Method::BasicGetOk(_) => (60, 71),
            Method::BasicGetEmpty => (60, 72),
            Method::BasicAck(_) => (60, 80),
            Method::BasicReject(_) => (60, 90),
            Method::BasicRecoverAsync(_) => (60, 100),
            Method::BasicRecover(_) => (60, 110),
            Method::BasicRecoverOk => (60, 111),
            Method::BasicNack(_) => (60, 120),
            Method::TxSelect => (90, 10),
            Method::TxSelectOk => (90, 11),
            Method::TxCommit => (90, 20),
            Method::TxCommitOk => (90, 21),
            Method::TxRollback => (90, 30),
            Method::TxRollbackOk => (90, 31),
            Method::ConfirmSelect(_) => (85, 10),
            Method::ConfirmSelectOk => (85, 11),
        }
    }

    /// Human-readable `class.method` name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Method::ConnectionStart(_) => "connection.start",
            Method::ConnectionStartOk(_) => "connection.start-ok",
            Method::ConnectionSecure(_) => "connection.secure",
            Method::ConnectionSecureOk(_) => "connection.secure-ok",
            Method::ConnectionTune(_) => "connection.tune",
            Method::ConnectionTuneOk(_) => "connection.tune-ok",
            Method::ConnectionOpen(_) => "connection.open",
            Method::ConnectionOpenOk => "connection.open-ok",
            Method::ConnectionClose(_) => "connection.close",
            Method::ConnectionCloseOk => "connection.close-ok",
            Method::ChannelOpen => "channel.open",
            Method::ChannelOpenOk => "channel.open-ok",
            Method::ChannelFlow(_) => "channel.flow",
            Method::ChannelFlowOk(_) => "channel.flow-ok",
            Method::ChannelClose(_) => "channel.close",
            Method::ChannelCloseOk => "channel.close-ok",
            Method::ExchangeDeclare(_) => "exchange.declare",
            Method::ExchangeDeclareOk => "exchange.declare-ok",
            Method::ExchangeDelete(_) => "exchange.delete",
            Method::ExchangeDeleteOk => "exchange.delete-ok",
            Method::QueueDeclare(_) => "queue.declare",
            Method::QueueDeclareOk(_) => "queue.declare-ok",
            Method::QueueBind(_) => "queue.bind",
            Method::QueueBindOk => "queue.bind-ok",
            Method::QueuePurge(_) => "queue.purge",
            Method::QueuePurgeOk(_) => "queue.purge-ok",
            Method::QueueDelete(_) => "queue.delete",
            Method::QueueDeleteOk(_) => "queue.delete-ok",
            Method::QueueUnbind(_) => "queue.unbind",
            Method::QueueUnbindOk => "queue.unbind-ok",
            Method::BasicQos(_) => "basic.qos",
            Method::BasicQosOk => "basic.qos-ok",
            Method::BasicConsume(_) => "basic.consume",
            Method::BasicConsumeOk(_) => "basic.consume-ok",
            Method::BasicCancel(_) => "basic.cancel",
            Method::BasicCancelOk(_) => "basic.cancel-ok",
            Method::BasicPublish(_) => "basic.publish",
            Method::BasicReturn(_) => "basic.return",
            Method::BasicDeliver(_) => "basic.deliver",
            Method::BasicGet(_) => "basic.get",
            Method::BasicGetOk(_) => "basic.get-ok",
            Method::BasicGetEmpty => "basic.get-empty",
            Method::BasicAck(_) => "basic.ack",
            Method::BasicReject(_) => "basic.reject",
            Method::BasicRecoverAsync(_) => "basic.recover-async",
            Method::BasicRecover(_) => "basic.recover",
            Method::BasicRecoverOk => "basic.recover-ok",
            Method::BasicNack(_) => "basic.nack",
            Method::TxSelect => "tx.select",
            Method::TxSelectOk => "tx.select-ok",
            Method::TxCommit => "tx.commit",
            Method::TxCommitOk => "tx.commit-ok",
            Method::TxRollback => "tx.rollback",
            Method::TxRollbackOk => "tx.rollback-ok",
            Method::ConfirmSelect(_) => "confirm.select",
            Method::ConfirmSelectOk => "confirm.select-ok",
        }
    }

    /// For methods whose argument section is byte-identical every time,
    /// the complete precomputed frame payload (class id, method id,
    /// arguments). Senders use this to skip per-call encoding.
    pub fn static_content(&self) -> Option<&'static [u8]> {
        match self {
            Method::ConnectionOpenOk => Some(b"\x00\x0A\x00\x29\x00"),
            Method::ConnectionCloseOk => Some(b"\x00\x0A\x00\x33"),
            Method::ChannelOpen => Some(b"\x00\x14\x00\x0A\x00"),
            Method::ChannelOpenOk => Some(b"\x00\x14\x00\x0B\x00\x00\x00\x00"),
            Method::ChannelCloseOk => Some(b"\x00\x14\x00\x29"),
            Method::ExchangeDeclareOk => Some(b"\x00\x28\x00\x0B"),
            Method::ExchangeDeleteOk => Some(b"\x00\x28\x00\x15"),
            Method::QueueBindOk => Some(b"\x00\x32\x00\x15"),
            Method::QueueUnbindOk => Some(b"\x00\x32\x00\x33"),
            Method::BasicQosOk => Some(b"\x00\x3C\x00\x0B"),
            Method::BasicGetEmpty => Some(b"\x00\x3C\x00\x48\x00"),
            Method::BasicRecoverOk => Some(b"\x00\x3C\x00\x6F"),
            Method::TxSelect => Some(b"\x00\x5A\x00\x0A"),
            Method::TxSelectOk => Some(b"\x00\x5A\x00\x0B"),
            Method::TxCommit => Some(b"\x00\x5A\x00\x14"),
            Method::TxCommitOk => Some(b"\x00\x5A\x00\x15"),
            Method::TxRollback => Some(b"\x00\x5A\x00\x1E"),
            Method::TxRollbackOk => Some(b"\x00\x5A\x00\x1F"),
            Method::ConfirmSelectOk => Some(b"\x00\x55\x00\x0B"),
            _ => None,
        }
    }

    /// The synchronous replies this method may receive, or empty for
    /// asynchronous methods. `basic.get` is the one method with two
    /// possible replies.
    pub fn replies(&self) -> &'static [MethodIdent] {
        match self {
            Method::ConnectionStart(_) => &[(10, 11)],
            Method::ConnectionSecure(_) => &[(10, 21)],
            Method::ConnectionTune(_) => &[(10, 31)],
            Method::ConnectionOpen(_) => &[(10, 41)],
            Method::ConnectionClose(_) => &[(10, 51)],
            Method::ChannelOpen => &[(20, 11)],
            Method::ChannelFlow(_) => &[(20, 21)],
            Method::ChannelClose(_) => &[(20, 41)],
            Method::ExchangeDeclare(_) => &[(40, 11)],
            Method::ExchangeDelete(_) => &[(40, 21)],
            Method::QueueDeclare(_) => &[(50, 11)],
            Method::QueueBind(_) => &[(50, 21)],
            Method::QueuePurge(_) => &[(50, 31)],
            Method::QueueDelete(_) => &[(50, 41)],
            Method::QueueUnbind(_) => &[(50, 51)],
            Method::BasicQos(_) => &[(60, 11)],
            Method::BasicConsume(_) => &[(60, 21)],
            Method::BasicCancel(_) => &[(60, 31)],
            Method::BasicGet(_) => &[(60, 71), (60, 72)],
            Method::TxSelect => &[(90, 11)],
            Method::TxCommit => &[(90, 21)],
            Method::TxRollback => &[(90, 31)],
            Method::ConfirmSelect(_) => &[(85, 11)],
            _ => &[],
        }
    }

    /// The request method this method replies to, if it is a reply.
    pub fn reply_to(&self) -> Option<MethodIdent> {
        match self {
            Method::ConnectionStartOk(_) => Some((10, 10)),
            Method::ConnectionSecureOk(_) => Some((10, 20)),
            Method::ConnectionTuneOk(_) => Some((10, 30)),
            Method::ConnectionOpenOk => Some((10, 40)),
            Method::ConnectionCloseOk => Some((10, 50)),
            Method::ChannelOpenOk => Some((20, 10)),
            Method::ChannelFlowOk(_) => Some((20, 20)),
            Method::ChannelCloseOk => Some((20, 40)),
            Method::ExchangeDeclareOk => Some((40, 10)),
            Method::ExchangeDeleteOk => Some((40, 20)),
            Method::QueueDeclareOk(_) => Some((50, 10)),
            Method::QueueBindOk => Some((50, 20)),
            Method::QueuePurgeOk(_) => Some((50, 30)),
            Method::QueueDeleteOk(_) => Some((50, 40)),
            Method::QueueUnbindOk => Some((50, 50)),
            Method::BasicQosOk => Some((60, 10)),
            Method::BasicConsumeOk(_) => Some((60, 20)),
            Method::BasicCancelOk(_) => Some((60, 30)),
            Method::BasicGetOk(_) | Method::BasicGetEmpty => Some((60, 70)),
            Method::TxSelectOk => Some((90, 10)),
            Method::TxCommitOk => Some((90, 20)),
            Method::TxRollbackOk => Some((90, 30)),
            Method::ConfirmSelectOk => Some((85, 10)),
            _ => None,
        }
    }

    /// Whether this method announces a content body (header + body frames
    /// follow on the same channel).
    pub fn has_content(&self) -> bool {
        matches!(
            self,
            Method::BasicPublish(_)
                | Method::BasicReturn(_)
                | Method::BasicDeliver(_)
                | Method::BasicGetOk(_)
        )
    }

    /// Serialize into a complete method frame payload.
    pub fn to_payload(&self) -> AmqpResult<Bytes> {
        if let Some(content) = self.static_content() {
            return Ok(Bytes::from_static(content));
        }
        let (class_id, method_id) = self.ident();
        let mut enc = Encoder::with_capacity(64);
        enc.put_short(class_id);
        enc.put_short(method_id);
        self.encode_args(&mut enc)?;
        Ok(enc.finish())
    }

    fn encode_args(&self, enc: &mut Encoder) -> AmqpResult<()> {
        match self {
            Method::ConnectionStart(m) => {
                enc.put_octet(m.version_major);
                enc.put_octet(m.version_minor);
                enc.put_table(&m.server_properties)?;
                enc.put_longstr(&m.mechanisms)?;
                enc.put_longstr(&m.locales)?;
            }
            Method::ConnectionStartOk(m) => {
                enc.put_table(&m.client_properties)?;
                enc.put_shortstr(&m.mechanism)?;
                enc.put_longstr(&m.response)?;
                enc.put_shortstr(&m.locale)?;
            }
            Method::ConnectionSecure(m) => enc.put_longstr(&m.challenge)?,
            Method::ConnectionSecureOk(m) => enc.put_longstr(&m.response)?,
            Method::ConnectionTune(m) => {
                enc.put_short(m.channel_max);
                enc.put_long(m.frame_max);
                enc.put_short(m.heartbeat);
            }
            Method::ConnectionTuneOk(m) => {
                enc.put_short(m.channel_max);
                enc.put_long(m.frame_max);
                enc.put_short(m.heartbeat);
            }
            Method::ConnectionOpen(m) => {
                enc.put_shortstr(&m.virtual_host)?;
                enc.put_shortstr("")?;
                enc.put_bits(&[false])?;
            }
            Method::ConnectionClose(m) => {
                enc.put_short(m.reply_code);
                enc.put_shortstr(&m.reply_text)?;
                enc.put_short(m.class_id);
                enc.put_short(m.method_id);
            }
            Method::ChannelClose(m) => {
                enc.put_short(m.reply_code);
                enc.put_shortstr(&m.reply_text)?;
                enc.put_short(m.class_id);
                enc.put_short(m.method_id);
            }
            Method::ChannelFlow(m) => enc.put_bits(&[m.active])?,
            Method::ChannelFlowOk(m) => enc.put_bits(&[m.active])?,
            Method::ExchangeDeclare(m) => {
                enc.put_short(0);
                enc.put_shortstr(&m.exchange)?;
                enc.put_shortstr(&m.kind)?;
                enc.put_bits(&[m.passive, m.durable, false, false, m.no_wait])?;
                enc.put_table(&m.arguments)?;
            }
            Method::ExchangeDelete(m) => {
                enc.put_short(0);
                enc.put_shortstr(&m.exchange)?;
                enc.put_bits(&[m.if_unused, m.no_wait])?;
            }
            Method::QueueDeclare(m) => {
                enc.put_short(0);
                enc.put_shortstr(&m.queue)?;
                enc.put_bits(&[m.passive, m.durable, m.exclusive, m.auto_delete, m.no_wait])?;
                enc.put_table(&m.arguments)?;
            }
            Method::QueueDeclareOk(m) => {
                enc.put_shortstr(&m.queue)?;
                enc.put_long(m.message_count);
                enc.put_long(m.consumer_count);
            }
            Method::QueueBind(m) => {
                enc.put_short(0);
                enc.put_shortstr(&m.queue)?;
                enc.put_shortstr(&m.exchange)?;
                enc.put_shortstr(&m.routing_key)?;
                enc.put_bits(&[m.no_wait])?;
                enc.put_table(&m.arguments)?;
            }
            Method::QueuePurge(m) => {
                enc.put_short(0);
                enc.put_shortstr(&m.queue)?;
                enc.put_bits(&[m.no_wait])?;
            }
            Method::QueuePurgeOk(m) => enc.put_long(m.message_count),
            Method::QueueDelete(m) => {
                enc.put_short(0);
                enc.put_shortstr(&m.queue)?;
                enc.put_bits(&[m.if_unused, m.if_empty, m.no_wait])?;
            }
            Method::QueueDeleteOk(m) => enc.put_long(m.message_count),
            Method::QueueUnbind(m) => {
                enc.put_short(0);
                enc.put_shortstr(&m.queue)?;
                enc.put_shortstr(&m.exchange)?;
                enc.put_shortstr(&m.routing_key)?;
                enc.put_table(&m.arguments)?;
            }
            Method::BasicQos(m) => {
                enc.put_long(m.prefetch_size);
                enc.put_short(m.prefetch_count);
                enc.put_bits(&[m.global])?;
            }
            Method::BasicConsume(m) => {
                enc.put_short(0);
                enc.put_shortstr(&m.queue)?;
                enc.put_shortstr(&m.consumer_tag)?;
                enc.put_bits(&[m.no_local, m.no_ack, m.exclusive, m.no_wait])?;
                enc.put_table(&m.arguments)?;
            }
            Method::BasicConsumeOk(m) => enc.put_shortstr(&m.consumer_tag)?,
            Method::BasicCancel(m) => {
                enc.put_shortstr(&m.consumer_tag)?;
                enc.put_bits(&[m.no_wait])?;
            }
            Method::BasicCancelOk(m) => enc.put_shortstr(&m.consumer_tag)?,
            Method::BasicPublish(m) => {
                enc.put_short(0);
                enc.put_shortstr(&m.exchange)?;
                enc.put_shortstr(&m.routing_key)?;
                enc.put_bits(&[m.mandatory, m.immediate])?;
            }
            Method::BasicReturn(m) => {
                enc.put_short(m.reply_code);
                enc.put_shortstr(&m.reply_text)?;
                enc.put_shortstr(&m.exchange)?;
                enc.put_shortstr(&m.routing_key)?;
            }
            Method::BasicDeliver(m) => {
                enc.put_shortstr(&m.consumer_tag)?;
                enc.put_longlong(m.delivery_tag);
                enc.put_bits(&[m.redelivered])?;
                enc.put_shortstr(&m.exchange)?;
                enc.put_shortstr(&m.routing_key)?;
            }
            Method::BasicGet(m) => {
                enc.put_short(0);
                enc.put_shortstr(&m.queue)?;
                enc.put_bits(&[m.no_ack])?;
            }
            Method::BasicGetOk(m) => {
                enc.put_longlong(m.delivery_tag);
                enc.put_bits(&[m.redelivered])?;
                enc.put_shortstr(&m.exchange)?;
                enc.put_shortstr(&m.routing_key)?;
                enc.put_long(m.message_count);
            }
            // delivery-tag first, then the flag octet; the wire order is
            // pinned by a regression test below
            Method::BasicAck(m) => {
                enc.put_longlong(m.delivery_tag);
                enc.put_bits(&[m.multiple])?;
            }
            Method::BasicReject(m) => {
                enc.put_longlong(m.delivery_tag);
                enc.put_bits(&[m.requeue])?;
            }
            Method::BasicRecoverAsync(m) | Method::BasicRecover(m) => {
                enc.put_bits(&[m.requeue])?
            }
            Method::BasicNack(m) => {
                enc.put_longlong(m.delivery_tag);
                enc.put_bits(&[m.multiple, m.requeue])?;
            }
            Method::ConfirmSelect(m) => enc.put_bits(&[m.no_wait])?,
            // remaining methods carry static content and never reach here
            _ => {}
        }
        Ok(())
    }

    /// Parse a method frame payload whose class and method ids have already
    /// been consumed. Unknown identifiers fail the connection with
    /// `UNEXPECTED_FRAME`.
    pub fn decode(class_id: u16, method_id: u16, payload: Bytes) -> AmqpResult<Method> {
        let mut dec = Decoder::new(payload);
        let dec = &mut dec;
        match (class_id, method_id) {
            (10, 10) => Ok(Method::ConnectionStart(ConnectionStart {
                version_major: dec.get_octet()?,
                version_minor: dec.get_octet()?,
                server_properties: dec.get_table()?,
                mechanisms: dec.get_longstr()?,
                locales: dec.get_longstr()?,
            })),
            (10, 11) => Ok(Method::ConnectionStartOk(ConnectionStartOk {
                client_properties: dec.get_table()?,
                mechanism: dec.get_shortstr()?,
                response: dec.get_longstr()?,
                locale: dec.get_shortstr()?,
            })),
            (10, 20) => Ok(Method::ConnectionSecure(ConnectionSecure {
                challenge: dec.get_longstr()?,
            })),
            (10, 21) => Ok(Method::ConnectionSecureOk(ConnectionSecureOk {
                response: dec.get_longstr()?,
            })),
            (10, 30) => Ok(Method::ConnectionTune(ConnectionTune {
                channel_max: dec.get_short()?,
                frame_max: dec.get_long()?,
                heartbeat: dec.get_short()?,
            })),
            (10, 31) => Ok(Method::ConnectionTuneOk(ConnectionTuneOk {
                channel_max: dec.get_short()?,
                frame_max: dec.get_long()?,
                heartbeat: dec.get_short()?,
            })),
            (10, 40) => {
                let virtual_host = dec.get_shortstr()?;
                let _reserved = dec.get_shortstr()?;
                let _reserved = dec.get_octet()?;
                Ok(Method::ConnectionOpen(ConnectionOpen { virtual_host }))
            }
            (10, 41) => {
                let _reserved = dec.get_shortstr()?;
                Ok(Method::ConnectionOpenOk)
            }
            (10, 50) => Ok(Method::ConnectionClose(ConnectionClose {
                reply_code: dec.get_short()?,
                reply_text: dec.get_shortstr()?,
                class_id: dec.get_short()?,
                method_id: dec.get_short()?,
            })),
            (10, 51) => Ok(Method::ConnectionCloseOk),
            (20, 10) => {
                let _reserved = dec.get_shortstr()?;
                Ok(Method::ChannelOpen)
            }
            (20, 11) => {
                let _reserved = dec.get_longstr()?;
                Ok(Method::ChannelOpenOk)
            }
            (20, 20) => Ok(Method::ChannelFlow(ChannelFlow {
                active: dec.get_octet()? & 1 != 0,
            })),
            (20, 21) => Ok(Method::ChannelFlowOk(ChannelFlowOk {
                active: dec.get_octet()? & 1 != 0,
            })),
            (20, 40) => Ok(Method::ChannelClose(ChannelClose {
                reply_code: dec.get_short()?,
                reply_text: dec.get_shortstr()?,
                class_id: dec.get_short()?,
                method_id: dec.get_short()?,
            })),
            (20, 41) => Ok(Method::ChannelCloseOk),
            (40, 10) => {
                let _reserved = dec.get_short()?;
                let exchange = dec.get_shortstr()?;
                let kind = dec.get_shortstr()?;
                let bits = dec.get_octet()?;
                let arguments = dec.get_table()?;
                Ok(Method::ExchangeDeclare(ExchangeDeclare {
                    exchange,
                    kind,
                    passive: bits & 0x01 != 0,
                    durable: bits & 0x02 != 0,
                    no_wait: bits & 0x10 != 0,
                    arguments,
                }))
            }
            (40, 11) => Ok(Method::ExchangeDeclareOk),
            (40, 20) => {
                let _reserved = dec.get_short()?;
                let exchange = dec.get_shortstr()?;
                let bits = dec.get_octet()?;
                Ok(Method::ExchangeDelete(ExchangeDelete {
                    exchange,
                    if_unused: bits & 0x01 != 0,
                    no_wait: bits & 0x02 != 0,
                }))
            }
            (40, 21) => Ok(Method::ExchangeDeleteOk),
            (50, 10) => {
                let _reserved = dec.get_short()?;
                let queue = dec.get_shortstr()?;
                let bits = dec.get_octet()?;
                let arguments = dec.get_table()?;
                Ok(Method::QueueDeclare(QueueDeclare {
                    queue,
                    passive: bits & 0x01 != 0,
                    durable: bits & 0x02 != 0,
                    exclusive: bits & 0x04 != 0,
                    auto_delete: bits & 0x08 != 0,
                    no_wait: bits & 0x10 != 0,
                    arguments,
                }))
            }
            (50, 11) => Ok(Method::QueueDeclareOk(QueueDeclareOk {
                queue: dec.get_shortstr()?,
                message_count: dec.get_long()?,
                consumer_count: dec.get_long()?,
            })),
            (50, 20) => {
                let _reserved = dec.get_short()?;
                let queue = dec.get_shortstr()?;
                let exchange = dec.get_shortstr()?;
                let routing_key = dec.get_shortstr()?;
                let no_wait = dec.get_octet()? & 1 != 0;
                let arguments = dec.get_table()?;
                Ok(Method::QueueBind(QueueBind {
                    queue,
                    exchange,
                    routing_key,
                    no_wait,
                    arguments,
                }))
            }
            (50, 21) => Ok(Method::QueueBindOk),
            (50, 30) => {
                let _reserved = dec.get_short()?;
                Ok(Method::QueuePurge(QueuePurge {
                    queue: dec.get_shortstr()?,
                    no_wait: dec.get_octet()? & 1 != 0,
                }))
            }
            (50, 31) => Ok(Method::QueuePurgeOk(QueuePurgeOk {
                message_count: dec.get_long()?,
            })),
            (50, 40) => {
                let _reserved = dec.get_short()?;
                let queue = dec.get_shortstr()?;
                let bits = dec.get_octet()?;
                Ok(Method::QueueDelete(QueueDelete {
                    queue,
                    if_unused: bits & 0x01 != 0,
                    if_empty: bits & 0x02 != 0,
                    no_wait: bits & 0x04 != 0,
                }))
            }
            (50, 41) => Ok(Method::QueueDeleteOk(QueueDeleteOk {
                message_count: dec.get_long()?,
            })),
            (50, 50) => {
                let _reserved = dec.get_short()?;
                Ok(Method::QueueUnbind(QueueUnbind {
                    queue: dec.get_shortstr()?,
                    exchange: dec.get_shortstr()?,
                    routing_key: dec.get_shortstr()?,
                    arguments: dec.get_table()?,
                }))
            }
            (50, 51) => Ok(Method::QueueUnbindOk),
            (60, 10) => Ok(Method::BasicQos(BasicQos {
                prefetch_size: dec.get_long()?,
                prefetch_count: dec.get_short()?,
                global: dec.get_octet()? & 1 != 0,
            })),
            (60, 11) => Ok(Method::BasicQosOk),
            (60, 20) => {
                let _reserved = dec.get_short()?;
                let queue = dec.get_shortstr()?;
                let consumer_tag = dec.get_shortstr()?;
                let bits = dec.get_octet()?;
                let arguments = dec.get_table()?;
                Ok(Method::BasicConsume(BasicConsume {
                    queue,
                    consumer_tag,
                    no_local: bits & 0x01 != 0,
                    no_ack: bits & 0x02 != 0,
                    exclusive: bits & 0x04 != 0,
                    no_wait: bits & 0x08 != 0,
                    arguments,
                }))
            }
            (60, 21) => Ok(Method::BasicConsumeOk(BasicConsumeOk {
                consumer_tag: dec.get_shortstr()?,
            })),
            (60, 30) => Ok(Method::BasicCancel(BasicCancel {
                consumer_tag: dec.get_shortstr()?,
                no_wait: dec.get_octet()? & 1 != 0,
            })),
            (60, 31) => Ok(Method::BasicCancelOk(BasicCancelOk {
                consumer_tag: dec.get_shortstr()?,
            })),
            (60, 40) => {
                let _reserved = dec.get_short()?;
                let exchange = dec.get_shortstr()?;
                let routing_key = dec.get_shortstr()?;
                let bits = dec.get_octet()?;
                Ok(Method::BasicPublish(BasicPublish {
                    exchange,
                    routing_key,
                    mandatory: bits & 0x01 != 0,
                    immediate: bits & 0x02 != 0,
                }))
            }
            (60, 50) => Ok(Method::BasicReturn(BasicReturn {
                reply_code: dec.get_short()?,
                reply_text: dec.get_shortstr()?,
                exchange: dec.get_shortstr()?,
                routing_key: dec.get_shortstr()?,
            })),
            (60, 60) => Ok(Method::BasicDeliver(BasicDeliver {
                consumer_tag: dec.get_shortstr()?,
                delivery_tag: dec.get_longlong()?,
                redelivered: dec.get_octet()? & 1 != 0,
                exchange: dec.get_shortstr()?,
                routing_key: dec.get_shortstr()?,
            })),
            (60, 70) => {
                let _reserved = dec.get_short()?;
                Ok(Method::BasicGet(BasicGet {
                    queue: dec.get_shortstr()?,
                    no_ack: dec.get_octet()? & 1 != 0,
                }))
            }
            (60, 71) => Ok(Method::BasicGetOk(BasicGetOk {
                delivery_tag: dec.get_longlong()?,
                redelivered: dec.get_octet()? & 1 != 0,
                exchange: dec.get_shortstr()?,
                routing_key: dec.get_shortstr()?,
                message_count: dec.get_long()?,
            })),
            (60, 72) => {
                let _reserved = dec.get_shortstr()?;
                Ok(Method::BasicGetEmpty)
            }
            (60, 80) => Ok(Method::BasicAck(BasicAck {
                delivery_tag: dec.get_longlong()?,
                multiple: dec.get_octet()? & 1 != 0,
            })),
            (60, 90) => Ok(Method::BasicReject(BasicReject {
                delivery_tag: dec.get_longlong()?,
                requeue: dec.get_octet()? & 1 != 0,
            })),
            (60, 100) => Ok(Method::BasicRecoverAsync(BasicRecover {
                requeue: dec.get_octet()? & 1 != 0,
            })),
            (60, 110) => Ok(Method::BasicRecover(BasicRecover {
                requeue: dec.get_octet()? & 1 != 0,
            })),
            (60, 111) => Ok(Method::BasicRecoverOk),
            (60, 120) => {
                let delivery_tag = dec.get_longlong()?;
                let bits = dec.get_octet()?;
                Ok(Method::BasicNack(BasicNack {
                    delivery_tag,
                    multiple: bits & 0x01 != 0,
                    requeue: bits & 0x02 != 0,
                }))
            }
            (90, 10) => Ok(Method::TxSelect),
            (90, 11) => Ok(Method::TxSelectOk),
            (90, 20) => Ok(Method::TxCommit),
            (90, 21) => Ok(Method::TxCommitOk),
            (90, 30) => Ok(Method::TxRollback),
            (90, 31) => Ok(Method::TxRollbackOk),
            (85, 10) => Ok(Method::ConfirmSelect(ConfirmSelect {
                no_wait: dec.get_octet()? & 1 != 0,
            })),
            (85, 11) => Ok(Method::ConfirmSelectOk),
            _ => Err(AmqpError::protocol(
                UNEXPECTED_FRAME,
                format!("unknown method {}.{}", class_id, method_id),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;

    fn roundtrip(method: Method) -> Method {
        let payload = method.to_payload().unwrap();
        let mut dec = Decoder::new(payload);
        let class_id = dec.get_short().unwrap();
        let method_id = dec.get_short().unwrap();
        let rest = dec.get_bytes(dec.remaining()).unwrap();
        Method::decode(class_id, method_id, rest).unwrap()
    }

    #[test]
    fn test_connection_start_roundtrip() {
        let mut props = FieldTable::new();
        props.insert("product", FieldValue::from("RabbitMQ"));
        let method = Method::ConnectionStart(ConnectionStart {
            version_major: 0,
            version_minor: 9,
            server_properties: props,
            mechanisms: b"PLAIN AMQPLAIN".to_vec(),
            locales: b"en_US".to_vec(),
        });
        assert_eq!(roundtrip(method.clone()), method);
    }

    #[test]
    fn test_start_ok_roundtrip() {
        let method = Method::ConnectionStartOk(ConnectionStartOk {
            client_properties: FieldTable::new(),
            mechanism: "PLAIN".into(),
            response: b"\x00guest\x00guest".to_vec(),
            locale: "en_US".into(),
        });
        assert_eq!(roundtrip(method.clone()), method);
    }

    #[test]
    fn test_tune_roundtrip() {
        let method = Method::ConnectionTune(ConnectionTune {
            channel_max: 0,
            frame_max: 131072,
            heartbeat: 60,
        });
        assert_eq!(roundtrip(method.clone()), method);
    }

    #[test]
    fn test_close_roundtrip() {
        let method = Method::ConnectionClose(ConnectionClose {
            reply_code: 320,
            reply_text: "CONNECTION_FORCED - shutdown".into(),
            class_id: 0,
            method_id: 0,
        });
        assert_eq!(roundtrip(method.clone()), method);

        let method = Method::ChannelClose(ChannelClose {
            reply_code: 404,
            reply_text: "NOT_FOUND - no exchange 'missing'".into(),
            class_id: 60,
            method_id: 40,
        });
        assert_eq!(roundtrip(method.clone()), method);
    }

    #[test]
    fn test_queue_declare_roundtrip() {
        let method = Method::QueueDeclare(QueueDeclare {
            queue: "".into(),
            passive: false,
            durable: false,
            exclusive: true,
            auto_delete: true,
            no_wait: false,
            arguments: FieldTable::new(),
        });
        assert_eq!(roundtrip(method.clone()), method);
    }

    #[test]
    fn test_queue_declare_bit_packing() {
        let method = Method::QueueDeclare(QueueDeclare {
            queue: "q".into(),
            passive: true,
            durable: false,
            exclusive: true,
            auto_delete: false,
            no_wait: true,
            arguments: FieldTable::new(),
        });
        let payload = method.to_payload().unwrap();
        // class(2) method(2) reserved(2) shortstr "q"(2) bits(1) table(4)
        assert_eq!(payload.len(), 13);
        assert_eq!(payload[8], 0b0001_0101);
    }

    #[test]
    fn test_publish_consume_deliver_roundtrips() {
        let methods = vec![
            Method::BasicPublish(BasicPublish {
                exchange: "".into(),
                routing_key: "t".into(),
                mandatory: true,
                immediate: false,
            }),
            Method::BasicConsume(BasicConsume {
                queue: "t".into(),
                consumer_tag: "".into(),
                no_local: false,
                no_ack: true,
                exclusive: false,
                no_wait: false,
                arguments: FieldTable::new(),
            }),
            Method::BasicDeliver(BasicDeliver {
                consumer_tag: "amq.ctag-1".into(),
                delivery_tag: 7,
                redelivered: true,
                exchange: "".into(),
                routing_key: "t".into(),
            }),
            Method::BasicGetOk(BasicGetOk {
                delivery_tag: 3,
                redelivered: false,
                exchange: "logs".into(),
                routing_key: "info".into(),
                message_count: 12,
            }),
            Method::BasicReturn(BasicReturn {
                reply_code: 312,
                reply_text: "NO_ROUTE".into(),
                exchange: "missing".into(),
                routing_key: "k".into(),
            }),
        ];
        for method in methods {
            assert_eq!(roundtrip(method.clone()), method);
        }
    }

    #[test]
    fn test_basic_ack_wire_layout() {
        // delivery-tag (u64 BE) first, then the flag octet
        let payload = Method::BasicAck(BasicAck {
            delivery_tag: 0x0102030405060708,
            multiple: true,
        })
        .to_payload()
        .unwrap();
        assert_eq!(
            &payload[..],
            &[
                0x00, 0x3C, 0x00, 0x50, // class 60, method 80
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // delivery tag
                0x01, // multiple
            ]
        );
        let method = roundtrip(Method::BasicAck(BasicAck {
            delivery_tag: 42,
            multiple: false,
        }));
        assert_eq!(
            method,
            Method::BasicAck(BasicAck {
                delivery_tag: 42,
                multiple: false,
            })
        );
    }

    #[test]
    fn test_basic_nack_roundtrip() {
        let method = Method::BasicNack(BasicNack {
            delivery_tag: 9,
            multiple: false,
            requeue: true,
        });
        assert_eq!(roundtrip(method.clone()), method);
    }

    #[test]
    fn test_static_content_matches_encoder() {
        // every static payload must agree with what the arg encoder would
        // produce for the same method
        let statics = vec![
            Method::ConnectionOpenOk,
            Method::ConnectionCloseOk,
            Method::ChannelOpen,
            Method::ChannelOpenOk,
            Method::ChannelCloseOk,
            Method::ExchangeDeclareOk,
            Method::ExchangeDeleteOk,
            Method::QueueBindOk,
            Method::QueueUnbindOk,
            Method::BasicQosOk,
            Method::BasicGetEmpty,
            Method::BasicRecoverOk,
            Method::TxSelect,
            Method::TxSelectOk,
            Method::TxCommit,
            Method::TxCommitOk,
            Method::TxRollback,
            Method::TxRollbackOk,
            Method::ConfirmSelectOk,
        ];
        for method in statics {
            let payload = method.static_content().unwrap();
            let (class_id, method_id) = method.ident();
            assert_eq!(
                u16::from_be_bytes([payload[0], payload[1]]),
                class_id,
                "{}",
                method.name()
            );
            assert_eq!(
                u16::from_be_bytes([payload[2], payload[3]]),
                method_id,
                "{}",
                method.name()
            );
            assert_eq!(roundtrip(method.clone()), method);
        }
    }

    #[test]
    fn test_unknown_method_fails_505() {
        let err = Method::decode(99, 99, Bytes::new()).unwrap_err();
        assert_eq!(err.reply_code(), Some(UNEXPECTED_FRAME));
    }

    #[test]
    fn test_reply_relation() {
        let declare = Method::QueueDeclare(QueueDeclare {
            queue: "q".into(),
            passive: false,
            durable: true,
            exclusive: false,
            auto_delete: false,
            no_wait: false,
            arguments: FieldTable::new(),
        });
        assert_eq!(declare.replies(), &[(50, 11)]);

        let ok = Method::QueueDeclareOk(QueueDeclareOk {
            queue: "q".into(),
            message_count: 0,
            consumer_count: 0,
        });
        assert_eq!(ok.reply_to(), Some((50, 10)));

        let get = Method::BasicGet(BasicGet {
            queue: "q".into(),
            no_ack: false,
        });
        assert_eq!(get.replies(), &[(60, 71), (60, 72)]);
        assert_eq!(Method::BasicGetEmpty.reply_to(), Some((60, 70)));

        let publish = Method::BasicPublish(BasicPublish {
            exchange: "".into(),
            routing_key: "t".into(),
            mandatory: false,
            immediate: false,
        });
        assert!(publish.replies().is_empty());
    }

    #[test]
    fn test_content_carriers() {
        assert!(Method::BasicDeliver(BasicDeliver {
            consumer_tag: "t".into(),
            delivery_tag: 1,
            redelivered: false,
            exchange: "".into(),
            routing_key: "".into(),
        })
        .has_content());
        assert!(!Method::ChannelOpen.has_content());
    }

    #[test]
    fn test_truncated_payload_fails() {
        // connection.tune with only 3 bytes of arguments
        let err = Method::decode(10, 30, Bytes::from_static(&[0, 0, 1])).unwrap_err();
        assert!(matches!(err, AmqpError::Decoding(_)));
    }
}
