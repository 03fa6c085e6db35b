//! AMQP 0-9-1 frame layer.
//!
//! Every unit on the wire is a frame: a 7-byte header (`type: u8`,
//! `channel: u16`, `payload_size: u32`, all big-endian), the payload, and
//! the terminator octet `0xCE`. A terminator mismatch is a framing error
//! that must close the connection with reply code 501.
//!
//! [`Frame`] is the decoded form used throughout the crate; serialization
//! back to bytes happens in [`Frame::write_to`].

use bytes::{Buf, Bytes};

use crate::codec::{Decoder, Encoder};
use crate::content::ContentHeader;
use crate::error::{AmqpError, AmqpResult};
use crate::methods::{Method, FRAME_ERROR};

/// Frame type octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Method = 1,
    Header = 2,
    Body = 3,
    Heartbeat = 8,
}

impl FrameType {
    pub fn from_octet(octet: u8) -> AmqpResult<Self> {
        match octet {
            1 => Ok(FrameType::Method),
            2 => Ok(FrameType::Header),
            3 => Ok(FrameType::Body),
            8 => Ok(FrameType::Heartbeat),
            other => Err(AmqpError::protocol(
                FRAME_ERROR,
                format!("unknown frame type {}", other),
            )),
        }
    }
}

/// Protocol constants.
pub mod constants {
    /// Bytes a client sends first on a fresh TCP connection.
    pub const PROTOCOL_HEADER: &[u8] = b"AMQP\x00\x00\x09\x01";

    /// Every frame ends with this octet.
    pub const FRAME_END: u8 = 0xCE;

    /// Negotiated frame-max may never drop below this.
    pub const FRAME_MIN_SIZE: u32 = 4096;

    /// Frame header bytes plus the terminator: the per-frame overhead that
    /// body fragmentation must leave room for.
    pub const FRAME_OVERHEAD: usize = 8;
}

/// The decoded payload of a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    Method(Method),
    Header(ContentHeader),
    Body(Bytes),
    Heartbeat,
}

/// One decoded AMQP frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub channel: u16,
    pub payload: FramePayload,
}

impl Frame {
    pub fn method(channel: u16, method: Method) -> Self {
        Frame {
            channel,
            payload: FramePayload::Method(method),
        }
    }

    pub fn header(channel: u16, header: ContentHeader) -> Self {
        Frame {
            channel,
            payload: FramePayload::Header(header),
        }
    }

    pub fn body(channel: u16, fragment: Bytes) -> Self {
        Frame {
            channel,
            payload: FramePayload::Body(fragment),
        }
    }

    /// The heartbeat frame: type 8, channel 0, empty payload.
    pub fn heartbeat() -> Self {
        Frame {
            channel: 0,
            payload: FramePayload::Heartbeat,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match &self.payload {
            FramePayload::Method(_) => FrameType::Method,
            FramePayload::Header(_) => FrameType::Header,
            FramePayload::Body(_) => FrameType::Body,
            FramePayload::Heartbeat => FrameType::Heartbeat,
        }
    }

    /// Serialize this frame onto the end of `enc`.
    pub fn write_to(&self, enc: &mut Encoder) -> AmqpResult<()> {
        let payload = match &self.payload {
            FramePayload::Method(method) => method.to_payload()?,
            FramePayload::Header(header) => {
                let mut inner = Encoder::with_capacity(32);
                header.encode(&mut inner)?;
                inner.finish()
            }
            FramePayload::Body(fragment) => fragment.clone(),
            FramePayload::Heartbeat => Bytes::new(),
        };
        enc.put_octet(self.frame_type() as u8);
        enc.put_short(self.channel);
        enc.put_long(payload.len() as u32);
        enc.put_slice(&payload);
        enc.put_octet(constants::FRAME_END);
        Ok(())
    }

    /// Serialize into a standalone byte buffer.
    pub fn to_bytes(&self) -> AmqpResult<Bytes> {
        let mut enc = Encoder::with_capacity(64);
        self.write_to(&mut enc)?;
        Ok(enc.finish())
    }

    /// Decode a frame from its payload bytes, after the framer has
    /// established the boundaries and stripped header and terminator.
    pub fn decode(frame_type: u8, channel: u16, payload: Bytes) -> AmqpResult<Frame> {
        let payload = match FrameType::from_octet(frame_type)? {
            FrameType::Method => {
                let mut dec = Decoder::new(payload);
                let class_id = dec.get_short()?;
                let method_id = dec.get_short()?;
                let rest = dec.get_bytes(dec.remaining())?;
                FramePayload::Method(Method::decode(class_id, method_id, rest)?)
            }
            FrameType::Header => {
                let mut dec = Decoder::new(payload);
                FramePayload::Header(ContentHeader::decode(&mut dec)?)
            }
            FrameType::Body => FramePayload::Body(payload),
            FrameType::Heartbeat => {
                if !payload.is_empty() {
                    return Err(AmqpError::protocol(
                        FRAME_ERROR,
                        "heartbeat frame with non-empty payload",
                    ));
                }
                FramePayload::Heartbeat
            }
        };
        Ok(Frame { channel, payload })
    }
}

/// Split a message body into fragments that fit a negotiated frame size.
/// Fragments are zero-copy slices of `body`.
pub fn split_body(body: Bytes, frame_max: u32) -> Vec<Bytes> {
    let max_fragment = frame_max as usize - constants::FRAME_OVERHEAD;
    let mut fragments = Vec::with_capacity(body.len() / max_fragment + 1);
    let mut rest = body;
    while rest.len() > max_fragment {
        fragments.push(rest.split_to(max_fragment));
    }
    if !rest.is_empty() {
        fragments.push(rest);
    }
    fragments
}

/// Read the three header fields from a 7-byte slice.
pub(crate) fn parse_header(header: &[u8]) -> (u8, u16, u32) {
    let mut buf = header;
    let frame_type = buf.get_u8();
    let channel = buf.get_u16();
    let size = buf.get_u32();
    (frame_type, channel, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::BasicProperties;
    use crate::methods::ChannelFlow;

    #[test]
    fn test_every_frame_ends_with_terminator() {
        let frames = vec![
            Frame::heartbeat(),
            Frame::method(
                1,
                Method::ChannelFlow(ChannelFlow { active: true }),
            ),
            Frame::header(1, ContentHeader::new(3, BasicProperties::new())),
            Frame::body(1, Bytes::from_static(b"abc")),
        ];
        for frame in frames {
            let bytes = frame.to_bytes().unwrap();
            assert_eq!(*bytes.last().unwrap(), constants::FRAME_END);
        }
    }

    #[test]
    fn test_heartbeat_wire_form() {
        let bytes = Frame::heartbeat().to_bytes().unwrap();
        assert_eq!(&bytes[..], &[8, 0, 0, 0, 0, 0, 0, 0xCE]);
    }

    #[test]
    fn test_method_frame_roundtrip() {
        let frame = Frame::method(7, Method::ChannelFlow(ChannelFlow { active: false }));
        let bytes = frame.to_bytes().unwrap();

        let (frame_type, channel, size) = parse_header(&bytes[..7]);
        assert_eq!(frame_type, 1);
        assert_eq!(channel, 7);
        let payload = Bytes::copy_from_slice(&bytes[7..7 + size as usize]);
        let decoded = Frame::decode(frame_type, channel, payload).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_header_frame_roundtrip() {
        let header = ContentHeader::new(
            10_000,
            BasicProperties::new().with_content_type("text/plain"),
        );
        let frame = Frame::header(2, header);
        let bytes = frame.to_bytes().unwrap();
        let (frame_type, channel, size) = parse_header(&bytes[..7]);
        assert_eq!(frame_type, 2);
        let payload = Bytes::copy_from_slice(&bytes[7..7 + size as usize]);
        assert_eq!(Frame::decode(frame_type, channel, payload).unwrap(), frame);
    }

    #[test]
    fn test_unknown_frame_type_rejected() {
        let err = Frame::decode(4, 0, Bytes::new()).unwrap_err();
        assert_eq!(err.reply_code(), Some(FRAME_ERROR));
    }

    #[test]
    fn test_heartbeat_with_payload_rejected() {
        assert!(Frame::decode(8, 0, Bytes::from_static(b"x")).is_err());
    }

    #[test]
    fn test_split_body_boundaries() {
        // a body of exactly frame_max - 8 fits in one fragment
        let body = Bytes::from(vec![0u8; 4096 - 8]);
        assert_eq!(split_body(body, 4096).len(), 1);

        // one more byte forces a second fragment
        let body = Bytes::from(vec![0u8; 4096 - 7]);
        let fragments = split_body(body, 4096);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].len(), 4096 - 8);
        assert_eq!(fragments[1].len(), 1);
    }

    #[test]
    fn test_split_body_10k_at_4096() {
        let body = Bytes::from(vec![0x42u8; 10_000]);
        let fragments = split_body(body.clone(), 4096);
        assert_eq!(fragments.len(), 3);
        let total: usize = fragments.iter().map(|f| f.len()).sum();
        assert_eq!(total, 10_000);

        let mut joined = Vec::new();
        for fragment in &fragments {
            joined.extend_from_slice(fragment);
        }
        assert_eq!(joined, body);
    }

    #[test]
    fn test_split_empty_body() {
        assert!(split_body(Bytes::new(), 4096).is_empty());
    }
}
