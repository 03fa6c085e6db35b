//! Outbound frame batching and inbound stream framing.
//!
//! [`SendFramer`] collects frames queued during one reactor tick and
//! serializes each burst into a single contiguous buffer, so a burst
//! reaches the socket in one write. Two lanes exist: the priority lane
//! carries heartbeats and connection-close so they are never stuck behind
//! bulk publishes.
//!
//! [`RecvFramer`] is the inverse: it accepts arbitrary byte chunks from
//! the transport and yields whole frames, carrying partial input across
//! reads. It enforces the negotiated frame-max and the `0xCE` terminator;
//! either violation is a framing error (501) that must fail the
//! connection.

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::Encoder;
use crate::error::{AmqpError, AmqpResult};
use crate::frame::{constants, parse_header, Frame};
use crate::methods::FRAME_ERROR;

/// Batches outbound frames into contiguous write buffers.
pub struct SendFramer {
    normal: VecDeque<Bytes>,
    priority: VecDeque<Bytes>,
}

impl SendFramer {
    pub fn new() -> Self {
        SendFramer {
            normal: VecDeque::new(),
            priority: VecDeque::new(),
        }
    }

    /// Serialize a burst of frames into one buffer and queue it.
    pub fn enqueue(&mut self, frames: &[Frame], priority: bool) -> AmqpResult<()> {
        if frames.is_empty() {
            return Ok(());
        }
        let mut enc = Encoder::with_capacity(frames.len() * 64);
        for frame in frames {
            frame.write_to(&mut enc)?;
        }
        let burst = enc.finish();
        if priority {
            self.priority.push_back(burst);
        } else {
            self.normal.push_back(burst);
        }
        Ok(())
    }

    /// Whether any bytes are waiting for the socket.
    pub fn wants_to_write(&self) -> bool {
        !self.priority.is_empty() || !self.normal.is_empty()
    }

    /// Bytes currently queued across both lanes.
    pub fn pending_bytes(&self) -> usize {
        self.priority.iter().map(Bytes::len).sum::<usize>()
            + self.normal.iter().map(Bytes::len).sum::<usize>()
    }

    /// Take everything queued as one contiguous buffer, priority lane
    /// first. Returns `None` when nothing is pending.
    pub fn drain(&mut self) -> Option<Bytes> {
        if !self.wants_to_write() {
            return None;
        }
        if self.priority.is_empty() && self.normal.len() == 1 {
            return self.normal.pop_front();
        }
        if self.normal.is_empty() && self.priority.len() == 1 {
            return self.priority.pop_front();
        }
        let mut out = BytesMut::with_capacity(self.pending_bytes());
        for burst in self.priority.drain(..) {
            out.put_slice(&burst);
        }
        for burst in self.normal.drain(..) {
            out.put_slice(&burst);
        }
        Some(out.freeze())
    }
}

impl Default for SendFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Streaming frame parser.
///
/// State is implicit in the buffer: fewer than 7 bytes means the header is
/// still incomplete, otherwise the header announces how many payload bytes
/// must accumulate before the frame is whole.
pub struct RecvFramer {
    buffer: BytesMut,
    frame_max: u32,
}

impl RecvFramer {
    pub fn new(frame_max: u32) -> Self {
        RecvFramer {
            buffer: BytesMut::with_capacity(8 * 1024),
            frame_max,
        }
    }

    /// Raise the payload-size bound after tune negotiation.
    pub fn set_frame_max(&mut self, frame_max: u32) {
        self.frame_max = frame_max;
    }

    /// Append raw bytes received from the transport.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Mutable access to the accumulation buffer, so transports can read
    /// directly into it.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Bytes accumulated but not yet parsed into a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Parse the next whole frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> AmqpResult<Option<Frame>> {
        if self.buffer.len() < 7 {
            return Ok(None);
        }
        let (frame_type, channel, size) = parse_header(&self.buffer[..7]);
        if size > self.frame_max {
            return Err(AmqpError::protocol(
                FRAME_ERROR,
                format!(
                    "frame payload of {} bytes exceeds negotiated frame-max {}",
                    size, self.frame_max
                ),
            ));
        }
        let total = 7 + size as usize + 1;
        if self.buffer.len() < total {
            return Ok(None);
        }

        let mut raw = self.buffer.split_to(total).freeze();
        let terminator = raw[total - 1];
        if terminator != constants::FRAME_END {
            return Err(AmqpError::protocol(
                FRAME_ERROR,
                format!("bad frame terminator 0x{:02x}", terminator),
            ));
        }
        let payload = raw.split_off(7).split_to(size as usize);
        Frame::decode(frame_type, channel, payload).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{BasicProperties, ContentHeader};
    use crate::frame::FramePayload;
    use crate::methods::{BasicPublish, Method};

    fn publish_frame(channel: u16) -> Frame {
        Frame::method(
            channel,
            Method::BasicPublish(BasicPublish {
                exchange: "".into(),
                routing_key: "t".into(),
                mandatory: false,
                immediate: false,
            }),
        )
    }

    #[test]
    fn test_send_framer_batches_burst() {
        let mut framer = SendFramer::new();
        assert!(!framer.wants_to_write());
        assert!(framer.drain().is_none());

        let frames = vec![
            publish_frame(1),
            Frame::header(1, ContentHeader::new(2, BasicProperties::new())),
            Frame::body(1, Bytes::from_static(b"ok")),
        ];
        framer.enqueue(&frames, false).unwrap();
        assert!(framer.wants_to_write());

        let burst = framer.drain().unwrap();
        let expected: usize = frames
            .iter()
            .map(|f| f.to_bytes().unwrap().len())
            .sum();
        assert_eq!(burst.len(), expected);
        assert!(!framer.wants_to_write());
    }

    #[test]
    fn test_priority_lane_goes_first() {
        let mut framer = SendFramer::new();
        framer.enqueue(&[publish_frame(1)], false).unwrap();
        framer.enqueue(&[Frame::heartbeat()], true).unwrap();

        let burst = framer.drain().unwrap();
        // heartbeat frame serialized ahead of the earlier publish
        assert_eq!(&burst[..8], &[8, 0, 0, 0, 0, 0, 0, 0xCE]);
    }

    #[test]
    fn test_recv_framer_whole_frame() {
        let mut framer = RecvFramer::new(4096);
        let bytes = Frame::heartbeat().to_bytes().unwrap();
        framer.feed(&bytes);
        let frame = framer.next_frame().unwrap().unwrap();
        assert_eq!(frame, Frame::heartbeat());
        assert!(framer.next_frame().unwrap().is_none());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_recv_framer_byte_at_a_time() {
        let mut framer = RecvFramer::new(4096);
        let frame = publish_frame(3);
        let bytes = frame.to_bytes().unwrap();

        for (i, byte) in bytes.iter().enumerate() {
            assert!(
                framer.next_frame().unwrap().is_none(),
                "no frame before byte {}",
                i
            );
            framer.feed(&[*byte]);
        }
        assert_eq!(framer.next_frame().unwrap().unwrap(), frame);
    }

    #[test]
    fn test_recv_framer_multiple_frames_one_chunk() {
        let mut framer = RecvFramer::new(4096);
        let a = publish_frame(1);
        let b = Frame::body(1, Bytes::from_static(b"payload"));
        let mut chunk = a.to_bytes().unwrap().to_vec();
        chunk.extend_from_slice(&b.to_bytes().unwrap());
        framer.feed(&chunk);

        assert_eq!(framer.next_frame().unwrap().unwrap(), a);
        assert_eq!(framer.next_frame().unwrap().unwrap(), b);
        assert!(framer.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_recv_framer_bad_terminator() {
        let mut framer = RecvFramer::new(4096);
        let mut bytes = Frame::heartbeat().to_bytes().unwrap().to_vec();
        *bytes.last_mut().unwrap() = 0x00;
        framer.feed(&bytes);
        let err = framer.next_frame().unwrap_err();
        assert_eq!(err.reply_code(), Some(FRAME_ERROR));
    }

    #[test]
    fn test_recv_framer_frame_max_enforced() {
        let mut framer = RecvFramer::new(16);
        // header announcing a 17-byte payload
        framer.feed(&[3, 0, 1, 0, 0, 0, 17]);
        let err = framer.next_frame().unwrap_err();
        assert_eq!(err.reply_code(), Some(FRAME_ERROR));
    }

    #[test]
    fn test_recv_framer_body_zero_copy() {
        let mut framer = RecvFramer::new(4096);
        let body = Bytes::from(vec![7u8; 128]);
        framer.feed(&Frame::body(2, body.clone()).to_bytes().unwrap());
        let frame = framer.next_frame().unwrap().unwrap();
        match frame.payload {
            FramePayload::Body(fragment) => assert_eq!(fragment, body),
            other => panic!("expected body frame, got {:?}", other),
        }
    }
}
