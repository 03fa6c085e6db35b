//! Content headers and basic-class message properties.
//!
//! A content message on the wire is one HEADER frame followed by zero or
//! more BODY frames. The header carries the class id, a weight of zero,
//! the total body size and a property list. Properties are announced by a
//! big-endian flag word whose bits map to the fields of the class-60
//! property schema in declaration order, most significant bit first; bit 0
//! of each word signals that another flag word follows.
//!
//! The codec here is table-driven: one encoder/decoder walks the schema
//! with a moving bit mask. No per-bitmask specialization.

use serde::{Deserialize, Serialize};

use crate::codec::{Decoder, Encoder};
use crate::error::{AmqpError, AmqpResult};
use crate::types::FieldTable;

/// Class id of the basic content class.
pub const BASIC_CLASS_ID: u16 = 60;

/// Properties of a basic-class message. Every field is optional; absent
/// fields occupy no bytes on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BasicProperties {
    /// MIME content type.
    pub content_type: Option<String>,
    /// MIME content encoding.
    pub content_encoding: Option<String>,
    /// Application header table.
    pub headers: Option<FieldTable>,
    /// 1 = non-persistent, 2 = persistent.
    pub delivery_mode: Option<u8>,
    /// Priority, 0 to 9.
    pub priority: Option<u8>,
    /// Application correlation identifier.
    pub correlation_id: Option<String>,
    /// Address to reply to.
    pub reply_to: Option<String>,
    /// Message expiration specification.
    pub expiration: Option<String>,
    /// Application message identifier.
    pub message_id: Option<String>,
    /// POSIX timestamp, seconds.
    pub timestamp: Option<u64>,
    /// Message type name.
    pub message_type: Option<String>,
    /// Creating user id.
    pub user_id: Option<String>,
    /// Creating application id.
    pub app_id: Option<String>,
    /// Reserved; must be empty when sent.
    pub cluster_id: Option<String>,
}

// Flag bit positions, first schema field in the most significant bit.
const FLAG_CONTENT_TYPE: u16 = 1 << 15;
const FLAG_CONTENT_ENCODING: u16 = 1 << 14;
const FLAG_HEADERS: u16 = 1 << 13;
const FLAG_DELIVERY_MODE: u16 = 1 << 12;
const FLAG_PRIORITY: u16 = 1 << 11;
const FLAG_CORRELATION_ID: u16 = 1 << 10;
const FLAG_REPLY_TO: u16 = 1 << 9;
const FLAG_EXPIRATION: u16 = 1 << 8;
const FLAG_MESSAGE_ID: u16 = 1 << 7;
const FLAG_TIMESTAMP: u16 = 1 << 6;
const FLAG_MESSAGE_TYPE: u16 = 1 << 5;
const FLAG_USER_ID: u16 = 1 << 4;
const FLAG_APP_ID: u16 = 1 << 3;
const FLAG_CLUSTER_ID: u16 = 1 << 2;

/// Continuation bit: another flag word follows this one.
const FLAG_CONTINUATION: u16 = 1;

impl BasicProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type(mut self, value: impl Into<String>) -> Self {
        self.content_type = Some(value.into());
        self
    }

    pub fn with_delivery_mode(mut self, value: u8) -> Self {
        self.delivery_mode = Some(value);
        self
    }

    pub fn with_headers(mut self, value: FieldTable) -> Self {
        self.headers = Some(value);
        self
    }

    pub fn with_correlation_id(mut self, value: impl Into<String>) -> Self {
        self.correlation_id = Some(value.into());
        self
    }

    pub fn with_reply_to(mut self, value: impl Into<String>) -> Self {
        self.reply_to = Some(value.into());
        self
    }

    pub fn with_message_id(mut self, value: impl Into<String>) -> Self {
        self.message_id = Some(value.into());
        self
    }

    /// The flag word announcing which fields are present. All class-60
    /// fields fit in one word, so the continuation bit is never set.
    pub fn flags(&self) -> u16 {
        let mut flags = 0;
        let mut set = |present: bool, bit: u16| {
            if present {
                flags |= bit;
            }
        };
        set(self.content_type.is_some(), FLAG_CONTENT_TYPE);
        set(self.content_encoding.is_some(), FLAG_CONTENT_ENCODING);
        set(self.headers.is_some(), FLAG_HEADERS);
        set(self.delivery_mode.is_some(), FLAG_DELIVERY_MODE);
        set(self.priority.is_some(), FLAG_PRIORITY);
        set(self.correlation_id.is_some(), FLAG_CORRELATION_ID);
        set(self.reply_to.is_some(), FLAG_REPLY_TO);
        set(self.expiration.is_some(), FLAG_EXPIRATION);
        set(self.message_id.is_some(), FLAG_MESSAGE_ID);
        set(self.timestamp.is_some(), FLAG_TIMESTAMP);
        set(self.message_type.is_some(), FLAG_MESSAGE_TYPE);
        set(self.user_id.is_some(), FLAG_USER_ID);
        set(self.app_id.is_some(), FLAG_APP_ID);
        set(self.cluster_id.is_some(), FLAG_CLUSTER_ID);
        flags
    }

    /// Encode the flag word followed by the present fields, in schema
    /// order.
    pub fn encode(&self, enc: &mut Encoder) -> AmqpResult<()> {
        enc.put_short(self.flags());
        if let Some(v) = &self.content_type {
            enc.put_shortstr(v)?;
        }
        if let Some(v) = &self.content_encoding {
            enc.put_shortstr(v)?;
        }
        if let Some(v) = &self.headers {
            enc.put_table(v)?;
        }
        if let Some(v) = self.delivery_mode {
            enc.put_octet(v);
        }
        if let Some(v) = self.priority {
            enc.put_octet(v);
        }
        if let Some(v) = &self.correlation_id {
            enc.put_shortstr(v)?;
        }
        if let Some(v) = &self.reply_to {
            enc.put_shortstr(v)?;
        }
        if let Some(v) = &self.expiration {
            enc.put_shortstr(v)?;
        }
        if let Some(v) = &self.message_id {
            enc.put_shortstr(v)?;
        }
        if let Some(v) = self.timestamp {
            enc.put_timestamp(v);
        }
        if let Some(v) = &self.message_type {
            enc.put_shortstr(v)?;
        }
        if let Some(v) = &self.user_id {
            enc.put_shortstr(v)?;
        }
        if let Some(v) = &self.app_id {
            enc.put_shortstr(v)?;
        }
        if let Some(v) = &self.cluster_id {
            enc.put_shortstr(v)?;
        }
        Ok(())
    }

    /// Decode the flag words and the fields they announce.
    pub fn decode(dec: &mut Decoder) -> AmqpResult<Self> {
        let flags = dec.get_short()?;
        // class 60 defines fourteen fields, all within the first word; a
        // continuation word may legally follow but must announce nothing
        if flags & FLAG_CONTINUATION != 0 {
            let next = dec.get_short()?;
            if next != 0 {
                return Err(AmqpError::decoding(format!(
                    "unexpected property flags in continuation word: {:#06x}",
                    next
                )));
            }
        }
        if flags & 0b10 != 0 {
            return Err(AmqpError::decoding("unknown property flag bit 1 set"));
        }

        let mut props = BasicProperties::default();
        if flags & FLAG_CONTENT_TYPE != 0 {
            props.content_type = Some(dec.get_shortstr()?);
        }
        if flags & FLAG_CONTENT_ENCODING != 0 {
            props.content_encoding = Some(dec.get_shortstr()?);
        }
        if flags & FLAG_HEADERS != 0 {
            props.headers = Some(dec.get_table()?);
        }
        if flags & FLAG_DELIVERY_MODE != 0 {
            props.delivery_mode = Some(dec.get_octet()?);
        }
        if flags & FLAG_PRIORITY != 0 {
            props.priority = Some(dec.get_octet()?);
        }
        if flags & FLAG_CORRELATION_ID != 0 {
            props.correlation_id = Some(dec.get_shortstr()?);
        }
        if flags & FLAG_REPLY_TO != 0 {
            props.reply_to = Some(dec.get_shortstr()?);
        }
        if flags & FLAG_EXPIRATION != 0 {
            props.expiration = Some(dec.get_shortstr()?);
        }
        if flags & FLAG_MESSAGE_ID != 0 {
            props.message_id = Some(dec.get_shortstr()?);
        }
        if flags & FLAG_TIMESTAMP != 0 {
            props.timestamp = Some(dec.get_timestamp()?);
        }
        if flags & FLAG_MESSAGE_TYPE != 0 {
            props.message_type = Some(dec.get_shortstr()?);
        }
        if flags & FLAG_USER_ID != 0 {
            props.user_id = Some(dec.get_shortstr()?);
        }
        if flags & FLAG_APP_ID != 0 {
            props.app_id = Some(dec.get_shortstr()?);
        }
        if flags & FLAG_CLUSTER_ID != 0 {
            props.cluster_id = Some(dec.get_shortstr()?);
        }
        Ok(props)
    }
}

/// Decoded payload of a HEADER frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentHeader {
    pub class_id: u16,
    pub body_size: u64,
    pub properties: BasicProperties,
}

impl ContentHeader {
    pub fn new(body_size: u64, properties: BasicProperties) -> Self {
        ContentHeader {
            class_id: BASIC_CLASS_ID,
            body_size,
            properties,
        }
    }

    pub fn encode(&self, enc: &mut Encoder) -> AmqpResult<()> {
        enc.put_short(self.class_id);
        enc.put_short(0); // weight, always zero
        enc.put_longlong(self.body_size);
        self.properties.encode(enc)
    }

    pub fn decode(dec: &mut Decoder) -> AmqpResult<Self> {
        let class_id = dec.get_short()?;
        let weight = dec.get_short()?;
        if weight != 0 {
            return Err(AmqpError::decoding(format!(
                "content header weight must be zero, got {}",
                weight
            )));
        }
        let body_size = dec.get_longlong()?;
        let properties = BasicProperties::decode(dec)?;
        Ok(ContentHeader {
            class_id,
            body_size,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;

    fn roundtrip(props: BasicProperties) -> BasicProperties {
        let mut enc = Encoder::new();
        props.encode(&mut enc).unwrap();
        let mut dec = Decoder::new(enc.finish());
        BasicProperties::decode(&mut dec).unwrap()
    }

    #[test]
    fn test_empty_properties() {
        let props = BasicProperties::new();
        assert_eq!(props.flags(), 0x0000);

        let mut enc = Encoder::new();
        props.encode(&mut enc).unwrap();
        let bytes = enc.finish();
        assert_eq!(&bytes[..], &[0x00, 0x00]);
        assert_eq!(roundtrip(props.clone()), props);
    }

    #[test]
    fn test_content_type_only() {
        let props = BasicProperties::new().with_content_type("text/plain");
        assert_eq!(props.flags(), 0x8000);
        assert_eq!(roundtrip(props.clone()), props);
    }

    #[test]
    fn test_all_fields_single_word() {
        let mut headers = FieldTable::new();
        headers.insert("x-source", FieldValue::from("tests"));
        let props = BasicProperties {
            content_type: Some("application/json".into()),
            content_encoding: Some("identity".into()),
            headers: Some(headers),
            delivery_mode: Some(2),
            priority: Some(5),
            correlation_id: Some("corr-1".into()),
            reply_to: Some("replies".into()),
            expiration: Some("60000".into()),
            message_id: Some("msg-9".into()),
            timestamp: Some(1_600_000_000),
            message_type: Some("event".into()),
            user_id: Some("guest".into()),
            app_id: Some("uplink".into()),
            cluster_id: Some("".into()),
        };
        // all fourteen fields fit in one flag word; the continuation bit
        // stays clear
        assert_eq!(props.flags() & 0x0001, 0);
        assert_eq!(props.flags(), 0b1111_1111_1111_1100);
        assert_eq!(roundtrip(props.clone()), props);
    }

    #[test]
    fn test_field_order_on_wire() {
        let props = BasicProperties::new()
            .with_content_type("a")
            .with_delivery_mode(1);
        let mut enc = Encoder::new();
        props.encode(&mut enc).unwrap();
        let bytes = enc.finish();
        // flags, then content-type before delivery-mode
        assert_eq!(&bytes[..], &[0x90, 0x00, 1, b'a', 1]);
    }

    #[test]
    fn test_continuation_word_tolerated_when_empty() {
        // flags word with continuation bit, then a zero second word
        let raw = vec![0x00, 0x01, 0x00, 0x00];
        let mut dec = Decoder::from_slice(&raw);
        let props = BasicProperties::decode(&mut dec).unwrap();
        assert_eq!(props, BasicProperties::default());
    }

    #[test]
    fn test_continuation_word_with_bits_rejected() {
        let raw = vec![0x00, 0x01, 0x80, 0x00];
        let mut dec = Decoder::from_slice(&raw);
        assert!(BasicProperties::decode(&mut dec).is_err());
    }

    #[test]
    fn test_content_header_roundtrip() {
        let header = ContentHeader::new(
            10_000,
            BasicProperties::new().with_content_type("text/plain"),
        );
        let mut enc = Encoder::new();
        header.encode(&mut enc).unwrap();
        let mut dec = Decoder::new(enc.finish());
        assert_eq!(ContentHeader::decode(&mut dec).unwrap(), header);
    }

    #[test]
    fn test_content_header_nonzero_weight_rejected() {
        let mut enc = Encoder::new();
        enc.put_short(60);
        enc.put_short(1);
        enc.put_longlong(0);
        enc.put_short(0);
        let mut dec = Decoder::new(enc.finish());
        assert!(ContentHeader::decode(&mut dec).is_err());
    }
}
