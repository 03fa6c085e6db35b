//! Binary encoding and decoding of AMQP 0-9-1 primitives.
//!
//! This module provides the two halves of the wire codec:
//!
//! - **[`Encoder`]**: appends primitives, field values and tables to a
//!   growable buffer.
//! - **[`Decoder`]**: consumes a byte buffer, yielding primitives with
//!   bounds checking on every read.
//!
//! All multi-byte integers are big-endian. Short strings carry a `u8`
//! length prefix and are limited to 255 bytes; long strings carry a `u32`
//! prefix. Field tables and arrays are prefixed with their encoded byte
//! length.
//!
//! # Examples
//!
//! ```rust
//! use uplink_amqp::codec::{Decoder, Encoder};
//! use uplink_amqp::types::{FieldTable, FieldValue};
//!
//! let mut table = FieldTable::new();
//! table.insert("ttl", FieldValue::U32(30_000));
//!
//! let mut enc = Encoder::new();
//! enc.put_table(&table).unwrap();
//!
//! let mut dec = Decoder::new(enc.finish());
//! assert_eq!(dec.get_table().unwrap(), table);
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{AmqpError, AmqpResult};
use crate::types::{Decimal, FieldTable, FieldValue, LONGSTR_MAX, SHORTSTR_MAX};

/// Wire encoder over a growable buffer.
pub struct Encoder {
    buffer: BytesMut,
}

impl Encoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Encoder {
            buffer: BytesMut::new(),
        }
    }

    /// Create a new encoder with initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Encoder {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Take the encoded bytes.
    pub fn finish(self) -> Bytes {
        self.buffer.freeze()
    }

    pub fn put_octet(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    pub fn put_short(&mut self, value: u16) {
        self.buffer.put_u16(value);
    }

    pub fn put_long(&mut self, value: u32) {
        self.buffer.put_u32(value);
    }

    pub fn put_longlong(&mut self, value: u64) {
        self.buffer.put_u64(value);
    }

    pub fn put_timestamp(&mut self, value: u64) {
        self.buffer.put_u64(value);
    }

    pub fn put_slice(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Append a short string: `u8` length then bytes. Fails if the string
    /// exceeds 255 bytes.
    pub fn put_shortstr(&mut self, value: &str) -> AmqpResult<()> {
        let bytes = value.as_bytes();
        if bytes.len() > SHORTSTR_MAX {
            return Err(AmqpError::encoding(format!(
                "short string of {} bytes exceeds {}",
                bytes.len(),
                SHORTSTR_MAX
            )));
        }
        self.buffer.put_u8(bytes.len() as u8);
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Append a long string: `u32` length then bytes.
    pub fn put_longstr(&mut self, value: &[u8]) -> AmqpResult<()> {
        if value.len() > LONGSTR_MAX {
            return Err(AmqpError::encoding("long string exceeds u32 range"));
        }
        self.buffer.put_u32(value.len() as u32);
        self.buffer.extend_from_slice(value);
        Ok(())
    }

    /// Pack up to eight bits into one octet, first flag in bit 0.
    pub fn put_bits(&mut self, bits: &[bool]) -> AmqpResult<()> {
        if bits.len() > 8 {
            return Err(AmqpError::encoding("more than 8 bits in one octet"));
        }
        let mut octet = 0u8;
        for (i, bit) in bits.iter().enumerate() {
            if *bit {
                octet |= 1 << i;
            }
        }
        self.buffer.put_u8(octet);
        Ok(())
    }

    /// Append a field table: `u32` byte length then the entries in order.
    pub fn put_table(&mut self, table: &FieldTable) -> AmqpResult<()> {
        let mut inner = Encoder::new();
        for (name, value) in table.iter() {
            inner.put_shortstr(name)?;
            inner.put_field_value(value)?;
        }
        let encoded = inner.finish();
        self.buffer.put_u32(encoded.len() as u32);
        self.buffer.extend_from_slice(&encoded);
        Ok(())
    }

    /// Append a tagged field value (tag octet then payload).
    pub fn put_field_value(&mut self, value: &FieldValue) -> AmqpResult<()> {
        self.buffer.put_u8(value.type_tag());
        match value {
            FieldValue::Boolean(v) => self.buffer.put_u8(*v as u8),
            FieldValue::I8(v) => self.buffer.put_i8(*v),
            FieldValue::U8(v) => self.buffer.put_u8(*v),
            FieldValue::I16(v) => self.buffer.put_i16(*v),
            FieldValue::U16(v) => self.buffer.put_u16(*v),
            FieldValue::I32(v) => self.buffer.put_i32(*v),
            FieldValue::U32(v) => self.buffer.put_u32(*v),
            FieldValue::I64(v) => self.buffer.put_i64(*v),
            FieldValue::U64(v) => self.buffer.put_u64(*v),
            FieldValue::Float(v) => self.buffer.put_f32(*v),
            FieldValue::Double(v) => self.buffer.put_f64(*v),
            FieldValue::Decimal(d) => {
                self.buffer.put_u8(d.scale);
                self.buffer.put_i32(d.value);
            }
            FieldValue::ShortString(s) => self.put_shortstr(s)?,
            FieldValue::LongString(b) => self.put_longstr(b)?,
            FieldValue::Array(items) => {
                let mut inner = Encoder::new();
                for item in items {
                    inner.put_field_value(item)?;
                }
                let encoded = inner.finish();
                self.buffer.put_u32(encoded.len() as u32);
                self.buffer.extend_from_slice(&encoded);
            }
            FieldValue::Timestamp(t) => self.buffer.put_u64(*t),
            FieldValue::Table(t) => self.put_table(t)?,
            FieldValue::Void => {}
        }
        Ok(())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wire decoder over an owned byte buffer.
pub struct Decoder {
    buffer: Bytes,
}

impl Decoder {
    pub fn new(data: Bytes) -> Self {
        Decoder { buffer: data }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Decoder {
            buffer: Bytes::copy_from_slice(data),
        }
    }

    /// Bytes left to decode.
    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    pub fn has_remaining(&self) -> bool {
        self.buffer.has_remaining()
    }

    fn need(&self, n: usize, what: &str) -> AmqpResult<()> {
        if self.buffer.remaining() < n {
            return Err(AmqpError::decoding(format!(
                "truncated buffer: need {} bytes for {}, have {}",
                n,
                what,
                self.buffer.remaining()
            )));
        }
        Ok(())
    }

    pub fn get_octet(&mut self) -> AmqpResult<u8> {
        self.need(1, "octet")?;
        Ok(self.buffer.get_u8())
    }

    pub fn get_short(&mut self) -> AmqpResult<u16> {
        self.need(2, "short")?;
        Ok(self.buffer.get_u16())
    }

    pub fn get_long(&mut self) -> AmqpResult<u32> {
        self.need(4, "long")?;
        Ok(self.buffer.get_u32())
    }

    pub fn get_longlong(&mut self) -> AmqpResult<u64> {
        self.need(8, "longlong")?;
        Ok(self.buffer.get_u64())
    }

    pub fn get_timestamp(&mut self) -> AmqpResult<u64> {
        self.need(8, "timestamp")?;
        Ok(self.buffer.get_u64())
    }

    /// Read `n` raw bytes without copying out of the backing buffer.
    pub fn get_bytes(&mut self, n: usize) -> AmqpResult<Bytes> {
        self.need(n, "raw bytes")?;
        Ok(self.buffer.copy_to_bytes(n))
    }

    /// Read a short string. The wire allows arbitrary bytes; non-UTF-8
    /// content is rejected since every short string this client consumes
    /// (names, tags, reply texts) is textual.
    pub fn get_shortstr(&mut self) -> AmqpResult<String> {
        let len = self.get_octet()? as usize;
        self.need(len, "short string")?;
        let data = self.buffer.copy_to_bytes(len);
        String::from_utf8(data.to_vec())
            .map_err(|e| AmqpError::decoding(format!("short string is not UTF-8: {}", e)))
    }

    /// Read a long string as raw bytes.
    pub fn get_longstr(&mut self) -> AmqpResult<Vec<u8>> {
        let len = self.get_long()? as usize;
        self.need(len, "long string")?;
        Ok(self.buffer.copy_to_bytes(len).to_vec())
    }

    /// Read a field table.
    pub fn get_table(&mut self) -> AmqpResult<FieldTable> {
        let len = self.get_long()? as usize;
        self.need(len, "field table")?;
        let mut inner = Decoder {
            buffer: self.buffer.copy_to_bytes(len),
        };
        let mut table = FieldTable::new();
        while inner.has_remaining() {
            let name = inner.get_shortstr()?;
            let value = inner.get_tagged_value()?;
            table.push_entry(name, value);
        }
        Ok(table)
    }

    /// Read a tag octet followed by the value it announces.
    pub fn get_tagged_value(&mut self) -> AmqpResult<FieldValue> {
        let tag = self.get_octet()?;
        self.get_field_value(tag)
    }

    /// Read the value for a known tag. An unknown tag is a framing error:
    /// the table cannot be skipped past reliably.
    pub fn get_field_value(&mut self, tag: u8) -> AmqpResult<FieldValue> {
        match tag {
            b't' => Ok(FieldValue::Boolean(self.get_octet()? != 0)),
            b'b' => {
                self.need(1, "i8")?;
                Ok(FieldValue::I8(self.buffer.get_i8()))
            }
            b'B' => Ok(FieldValue::U8(self.get_octet()?)),
            b'U' => {
                self.need(2, "i16")?;
                Ok(FieldValue::I16(self.buffer.get_i16()))
            }
            b'u' => Ok(FieldValue::U16(self.get_short()?)),
            b'I' => {
                self.need(4, "i32")?;
                Ok(FieldValue::I32(self.buffer.get_i32()))
            }
            b'i' => Ok(FieldValue::U32(self.get_long()?)),
            b'L' => {
                self.need(8, "i64")?;
                Ok(FieldValue::I64(self.buffer.get_i64()))
            }
            b'l' => Ok(FieldValue::U64(self.get_longlong()?)),
            b'f' => {
                self.need(4, "float")?;
                Ok(FieldValue::Float(self.buffer.get_f32()))
            }
            b'd' => {
                self.need(8, "double")?;
                Ok(FieldValue::Double(self.buffer.get_f64()))
            }
            b'D' => {
                self.need(5, "decimal")?;
                let scale = self.buffer.get_u8();
                let value = self.buffer.get_i32();
                Ok(FieldValue::Decimal(Decimal { scale, value }))
            }
            b's' => Ok(FieldValue::ShortString(self.get_shortstr()?)),
            b'S' => Ok(FieldValue::LongString(self.get_longstr()?)),
            b'A' => {
                let len = self.get_long()? as usize;
                self.need(len, "array")?;
                let mut inner = Decoder {
                    buffer: self.buffer.copy_to_bytes(len),
                };
                let mut items = Vec::new();
                while inner.has_remaining() {
                    items.push(inner.get_tagged_value()?);
                }
                Ok(FieldValue::Array(items))
            }
            b'T' => Ok(FieldValue::Timestamp(self.get_timestamp()?)),
            b'F' => Ok(FieldValue::Table(self.get_table()?)),
            b'V' => Ok(FieldValue::Void),
            other => Err(AmqpError::decoding(format!(
                "unknown field type tag 0x{:02x}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: FieldValue) -> FieldValue {
        let mut enc = Encoder::new();
        enc.put_field_value(&value).unwrap();
        let mut dec = Decoder::new(enc.finish());
        dec.get_tagged_value().unwrap()
    }

    #[test]
    fn test_scalar_roundtrips() {
        let values = vec![
            FieldValue::Boolean(true),
            FieldValue::Boolean(false),
            FieldValue::I8(-42),
            FieldValue::U8(200),
            FieldValue::I16(-12345),
            FieldValue::U16(54321),
            FieldValue::I32(-123456789),
            FieldValue::U32(3_000_000_000),
            FieldValue::I64(-1234567890123456789),
            FieldValue::U64(12345678901234567890),
            FieldValue::Float(3.25),
            FieldValue::Double(-2.5e300),
            FieldValue::Decimal(Decimal::new(2, 1995)),
            FieldValue::short_string("routing"),
            FieldValue::long_string(b"payload bytes".to_vec()),
            FieldValue::Timestamp(1_600_000_000),
            FieldValue::Void,
        ];
        for value in values {
            assert_eq!(roundtrip(value.clone()), value);
        }
    }

    #[test]
    fn test_shortstr_encoding() {
        let mut enc = Encoder::new();
        enc.put_shortstr("abc").unwrap();
        let bytes = enc.finish();
        assert_eq!(&bytes[..], &[3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_shortstr_boundary() {
        let ok = "x".repeat(255);
        let mut enc = Encoder::new();
        assert!(enc.put_shortstr(&ok).is_ok());

        let too_long = "x".repeat(256);
        let mut enc = Encoder::new();
        assert!(matches!(
            enc.put_shortstr(&too_long),
            Err(AmqpError::Encoding(_))
        ));
    }

    #[test]
    fn test_longstr_roundtrip() {
        let mut enc = Encoder::new();
        enc.put_longstr(b"\x00guest\x00guest").unwrap();
        let mut dec = Decoder::new(enc.finish());
        assert_eq!(dec.get_longstr().unwrap(), b"\x00guest\x00guest");
    }

    #[test]
    fn test_bits_pack_lsb_first() {
        let mut enc = Encoder::new();
        enc.put_bits(&[true, false, true, true]).unwrap();
        let bytes = enc.finish();
        assert_eq!(bytes[0], 0b0000_1101);
    }

    #[test]
    fn test_bits_overflow() {
        let mut enc = Encoder::new();
        assert!(enc.put_bits(&[false; 9]).is_err());
    }

    #[test]
    fn test_table_roundtrip() {
        let mut nested = FieldTable::new();
        nested.insert("inner", FieldValue::Boolean(true));

        let mut table = FieldTable::new();
        table.insert("count", FieldValue::U32(7));
        table.insert("label", FieldValue::short_string("hello"));
        table.insert(
            "values",
            FieldValue::Array(vec![FieldValue::I32(1), FieldValue::I32(-2)]),
        );
        table.insert("sub", FieldValue::Table(nested));
        table.insert("none", FieldValue::Void);

        let mut enc = Encoder::new();
        enc.put_table(&table).unwrap();
        let mut dec = Decoder::new(enc.finish());
        let decoded = dec.get_table().unwrap();
        assert_eq!(decoded, table);

        let names: Vec<&str> = decoded.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["count", "label", "values", "sub", "none"]);
    }

    #[test]
    fn test_empty_table() {
        let mut enc = Encoder::new();
        enc.put_table(&FieldTable::new()).unwrap();
        let bytes = enc.finish();
        assert_eq!(&bytes[..], &[0, 0, 0, 0]);

        let mut dec = Decoder::new(bytes);
        assert!(dec.get_table().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_tag_fails() {
        // name "x", tag 'Z' which no table may carry
        let raw = vec![0, 0, 0, 4, 1, b'x', b'Z', 0];
        let mut dec = Decoder::from_slice(&raw);
        assert!(matches!(dec.get_table(), Err(AmqpError::Decoding(_))));
    }

    #[test]
    fn test_truncated_table_fails() {
        let mut enc = Encoder::new();
        let mut table = FieldTable::new();
        table.insert("k", FieldValue::U32(1));
        enc.put_table(&table).unwrap();
        let bytes = enc.finish();

        let mut dec = Decoder::from_slice(&bytes[..bytes.len() - 2]);
        assert!(dec.get_table().is_err());
    }

    #[test]
    fn test_truncated_scalar_fails() {
        let mut dec = Decoder::from_slice(&[0x01]);
        assert!(dec.get_long().is_err());
        let mut dec = Decoder::from_slice(&[]);
        assert!(dec.get_octet().is_err());
    }
}
