//! Per-channel state.
//!
//! A channel is a small state machine multiplexed over the connection:
//!
//! ```text
//! Opening -> Open <-> FlowOff -> Closing -> Closed
//! ```
//!
//! plus a direct fall to `Closed` when the broker sends `channel.close`.
//! Each channel enforces the protocol's sequencing invariants: at most one
//! outstanding synchronous RPC, and strict method -> header -> body
//! ordering for inbound content.

use std::collections::BTreeMap;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::content::ContentHeader;
use crate::error::{AmqpError, AmqpResult};
use crate::frame::Frame;
use crate::methods::{Method, MethodIdent, UNEXPECTED_FRAME};

/// Channel lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Opening,
    Open,
    /// The broker paused outbound content with `channel.flow`.
    FlowOff,
    Closing,
    Closed,
}

/// An inbound content message being pieced together.
#[derive(Debug)]
pub(crate) struct ContentAssembly {
    pub method: Method,
    pub header: Option<ContentHeader>,
    pub fragments: Vec<Bytes>,
    received: u64,
}

/// A completed inbound content message.
#[derive(Debug)]
pub(crate) struct AssembledContent {
    pub method: Method,
    pub header: ContentHeader,
    pub fragments: Vec<Bytes>,
}

/// State of one channel on the multiplexed connection.
pub(crate) struct Channel {
    pub id: u16,
    pub state: ChannelState,
    /// Replies the in-flight synchronous request expects, if any.
    pending_rpc: Option<&'static [MethodIdent]>,
    assembly: Option<ContentAssembly>,
    /// Tag of the consumer bound to this channel. The client dedicates a
    /// channel per consumer, so one slot suffices.
    pub consumer_tag: Option<String>,
    /// Whether `confirm.select` has been issued on this channel.
    pub confirm_mode: bool,
    publish_seq: u64,
    unconfirmed: BTreeMap<u64, oneshot::Sender<AmqpResult<()>>>,
    /// Publish bursts held back while flow is off.
    flow_buffer: Vec<Vec<Frame>>,
}

impl Channel {
    pub fn new(id: u16) -> Self {
        Channel {
            id,
            state: ChannelState::Opening,
            pending_rpc: None,
            assembly: None,
            consumer_tag: None,
            confirm_mode: false,
            publish_seq: 0,
            unconfirmed: BTreeMap::new(),
            flow_buffer: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ChannelState::Open | ChannelState::FlowOff)
    }

    // -- synchronous RPC slot --

    /// Claim the RPC slot. Two overlapping synchronous calls on one
    /// channel is a local programming error, not a wire error.
    pub fn begin_rpc(&mut self, expected: &'static [MethodIdent]) -> AmqpResult<()> {
        if self.pending_rpc.is_some() {
            return Err(AmqpError::invalid_state(format!(
                "channel {} already has a synchronous method in flight",
                self.id
            )));
        }
        self.pending_rpc = Some(expected);
        Ok(())
    }

    /// Whether `ident` satisfies the pending RPC; clears the slot if so.
    pub fn complete_rpc(&mut self, ident: MethodIdent) -> bool {
        match self.pending_rpc {
            Some(expected) if expected.contains(&ident) => {
                self.pending_rpc = None;
                true
            }
            _ => false,
        }
    }

    /// Drop the pending RPC, if any (close, teardown).
    pub fn abort_rpc(&mut self) {
        self.pending_rpc = None;
    }

    pub fn rpc_pending(&self) -> bool {
        self.pending_rpc.is_some()
    }

    // -- inbound content assembly --

    /// Whether the next frame on this channel must be HEADER or BODY.
    pub fn expecting_content(&self) -> bool {
        self.assembly.is_some()
    }

    /// A content-carrying method (deliver, return, get-ok) arrived.
    pub fn start_content(&mut self, method: Method) -> AmqpResult<()> {
        if self.assembly.is_some() {
            return Err(AmqpError::protocol(
                UNEXPECTED_FRAME,
                format!(
                    "channel {}: {} while assembling previous content",
                    self.id,
                    method.name()
                ),
            ));
        }
        self.assembly = Some(ContentAssembly {
            method,
            header: None,
            fragments: Vec::new(),
            received: 0,
        });
        Ok(())
    }

    /// The HEADER frame for the pending content method. An empty body
    /// completes the message immediately.
    pub fn accept_header(&mut self, header: ContentHeader) -> AmqpResult<Option<AssembledContent>> {
        let assembly = self.assembly.as_mut().ok_or_else(|| {
            AmqpError::protocol(
                UNEXPECTED_FRAME,
                format!("channel {}: header frame without a content method", self.id),
            )
        })?;
        if assembly.header.is_some() {
            return Err(AmqpError::protocol(
                UNEXPECTED_FRAME,
                format!("channel {}: second header frame for one message", self.id),
            ));
        }
        let body_size = header.body_size;
        assembly.header = Some(header);
        if body_size == 0 {
            return Ok(self.finish_content());
        }
        Ok(None)
    }

    /// A BODY frame. Returns the completed message once the accumulated
    /// fragments reach the announced body size.
    pub fn accept_body(&mut self, fragment: Bytes) -> AmqpResult<Option<AssembledContent>> {
        let assembly = self.assembly.as_mut().ok_or_else(|| {
            AmqpError::protocol(
                UNEXPECTED_FRAME,
                format!("channel {}: body frame without a content method", self.id),
            )
        })?;
        let body_size = match &assembly.header {
            Some(header) => header.body_size,
            None => {
                return Err(AmqpError::protocol(
                    UNEXPECTED_FRAME,
                    format!("channel {}: body frame before the header frame", self.id),
                ))
            }
        };
        assembly.received += fragment.len() as u64;
        if assembly.received > body_size {
            return Err(AmqpError::protocol(
                UNEXPECTED_FRAME,
                format!(
                    "channel {}: body overruns announced size ({} > {})",
                    self.id, assembly.received, body_size
                ),
            ));
        }
        assembly.fragments.push(fragment);
        if assembly.received == body_size {
            return Ok(self.finish_content());
        }
        Ok(None)
    }

    fn finish_content(&mut self) -> Option<AssembledContent> {
        let assembly = self.assembly.take()?;
        let header = assembly.header?;
        Some(AssembledContent {
            method: assembly.method,
            header,
            fragments: assembly.fragments,
        })
    }

    /// Drop any half-assembled message (channel close, teardown).
    pub fn abort_content(&mut self) {
        self.assembly = None;
    }

    // -- publisher confirms --

    /// Sequence number the next publish on this confirm-mode channel
    /// will carry.
    pub fn next_publish_seq(&mut self) -> u64 {
        self.publish_seq += 1;
        self.publish_seq
    }

    pub fn record_unconfirmed(&mut self, seq: u64, done: oneshot::Sender<AmqpResult<()>>) {
        self.unconfirmed.insert(seq, done);
    }

    /// Resolve confirm waiters for a broker `basic.ack`/`basic.nack`.
    /// With `multiple`, every sequence up to and including `delivery_tag`
    /// resolves.
    pub fn resolve_confirms(
        &mut self,
        delivery_tag: u64,
        multiple: bool,
        result: impl Fn() -> AmqpResult<()>,
    ) {
        let resolved: Vec<u64> = if multiple {
            self.unconfirmed
                .range(..=delivery_tag)
                .map(|(seq, _)| *seq)
                .collect()
        } else {
            self.unconfirmed
                .contains_key(&delivery_tag)
                .then_some(delivery_tag)
                .into_iter()
                .collect()
        };
        for seq in resolved {
            if let Some(done) = self.unconfirmed.remove(&seq) {
                let _ = done.send(result());
            }
        }
    }

    /// Fail every outstanding confirm waiter (connection or channel loss).
    pub fn fail_confirms(&mut self, error: impl Fn() -> AmqpError) {
        for (_, done) in std::mem::take(&mut self.unconfirmed) {
            let _ = done.send(Err(error()));
        }
    }

    // -- flow control --

    /// Handle `channel.flow`. When resuming, returns the bursts buffered
    /// while paused, in the order they were enqueued.
    pub fn set_flow(&mut self, active: bool) -> Vec<Vec<Frame>> {
        if active {
            if self.state == ChannelState::FlowOff {
                self.state = ChannelState::Open;
            }
            std::mem::take(&mut self.flow_buffer)
        } else {
            if self.state == ChannelState::Open {
                self.state = ChannelState::FlowOff;
            }
            Vec::new()
        }
    }

    /// Hold back a publish burst while the broker has flow switched off.
    pub fn buffer_publish(&mut self, frames: Vec<Frame>) {
        self.flow_buffer.push(frames);
    }

    pub fn flow_paused(&self) -> bool {
        self.state == ChannelState::FlowOff
    }
}
