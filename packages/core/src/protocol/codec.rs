//! Protobuf примитивы (proto2 wire format)
//!
//! - varint (до 10 байт), tag = `(field << 3) | wire_type`
//! - length-delimited (bytes / вложенные сообщения)
//! - fixed64 / fixed32 читаются, чтобы не ломаться на чужих полях
//! - неизвестные поля пропускаются декодерами конкретных сообщений
//! - группы (wire type 3/4) не поддерживаются

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated input")]
    Truncated,
    #[error("varint is longer than 10 bytes")]
    VarintOverflow,
    #[error("length exceeds remaining bytes")]
    LengthOutOfRange,
    #[error("unsupported wire type {0}")]
    UnsupportedWireType(u8),
    #[error("invalid field number")]
    InvalidFieldNumber,
    #[error("unexpected wire type for field {0}")]
    UnexpectedWireType(u32),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid value: {0}")]
    Invalid(&'static str),
}

pub const WIRE_VARINT: u8 = 0;
pub const WIRE_FIXED64: u8 = 1;
pub const WIRE_LENGTH_DELIMITED: u8 = 2;
pub const WIRE_FIXED32: u8 = 5;

/// Значение одного поля
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Varint(u64),
    Fixed64(u64),
    Bytes(&'a [u8]),
    Fixed32(u32),
}

impl<'a> FieldValue<'a> {
    /// uint64: varint, либо fixed64 (старые записи хранили timestamp как fixed64)
    pub fn as_u64(&self, field: u32) -> Result<u64, CodecError> {
        match *self {
            FieldValue::Varint(v) | FieldValue::Fixed64(v) => Ok(v),
            _ => Err(CodecError::UnexpectedWireType(field)),
        }
    }

    /// uint32: как в protobuf, старшие биты varint отбрасываются
    pub fn as_u32(&self, field: u32) -> Result<u32, CodecError> {
        match *self {
            FieldValue::Varint(v) => Ok(v as u32),
            _ => Err(CodecError::UnexpectedWireType(field)),
        }
    }

    pub fn as_bytes(&self, field: u32) -> Result<&'a [u8], CodecError> {
        match *self {
            FieldValue::Bytes(b) => Ok(b),
            _ => Err(CodecError::UnexpectedWireType(field)),
        }
    }
}

#[derive(Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn read_varint(&mut self) -> Result<u64, CodecError> {
        let mut value = 0u64;
        for i in 0..10 {
            let byte = self.take(1)?[0];
            value |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::VarintOverflow)
    }

    /// Следующее поле или `None` в конце буфера
    pub fn read_field(&mut self) -> Result<Option<(u32, FieldValue<'a>)>, CodecError> {
        if self.remaining() == 0 {
            return Ok(None);
        }

        let tag = self.read_varint()?;
        let field = u32::try_from(tag >> 3).map_err(|_| CodecError::InvalidFieldNumber)?;
        if field == 0 {
            return Err(CodecError::InvalidFieldNumber);
        }

        let value = match (tag & 0x07) as u8 {
            WIRE_VARINT => FieldValue::Varint(self.read_varint()?),
            WIRE_FIXED64 => {
                let b = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                FieldValue::Fixed64(u64::from_le_bytes(raw))
            }
            WIRE_LENGTH_DELIMITED => {
                let len = usize::try_from(self.read_varint()?)
                    .map_err(|_| CodecError::LengthOutOfRange)?;
                if self.remaining() < len {
                    return Err(CodecError::LengthOutOfRange);
                }
                FieldValue::Bytes(self.take(len)?)
            }
            WIRE_FIXED32 => {
                let b = self.take(4)?;
                FieldValue::Fixed32(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            }
            other => return Err(CodecError::UnsupportedWireType(other)),
        };

        Ok(Some((field, value)))
    }
}

#[derive(Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.push((value as u8 & 0x7F) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    fn write_tag(&mut self, field: u32, wire_type: u8) {
        self.write_varint((u64::from(field) << 3) | u64::from(wire_type));
    }

    pub fn write_uint32(&mut self, field: u32, value: u32) {
        self.write_uint64(field, u64::from(value));
    }

    pub fn write_uint64(&mut self, field: u32, value: u64) {
        self.write_tag(field, WIRE_VARINT);
        self.write_varint(value);
    }

    pub fn write_bytes(&mut self, field: u32, value: &[u8]) {
        self.write_tag(field, WIRE_LENGTH_DELIMITED);
        self.write_varint(value.len() as u64);
        self.buf.extend_from_slice(value);
    }

    /// proto2 optional: поле пишется только если присутствует
    pub fn write_optional_uint32(&mut self, field: u32, value: Option<u32>) {
        if let Some(v) = value {
            self.write_uint32(field, v);
        }
    }

    pub fn write_optional_bytes(&mut self, field: u32, value: Option<&[u8]>) {
        if let Some(v) = value {
            self.write_bytes(field, v);
        }
    }

    // proto3 поля: значение по умолчанию не пишется

    pub fn write_uint32_nonzero(&mut self, field: u32, value: u32) {
        if value != 0 {
            self.write_uint32(field, value);
        }
    }

    pub fn write_uint64_nonzero(&mut self, field: u32, value: u64) {
        if value != 0 {
            self.write_uint64(field, value);
        }
    }

    pub fn write_bytes_nonempty(&mut self, field: u32, value: &[u8]) {
        if !value.is_empty() {
            self.write_bytes(field, value);
        }
    }
}
