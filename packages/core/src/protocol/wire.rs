// Wire format (protobuf)
// Тела SignalMessage и PreKeySignalMessage; version byte и MAC добавляет protocol::messages

use crate::protocol::codec::{CodecError, Reader, Writer};

/// Тело SignalMessage
///
/// | field | тип |
/// |---|---|
/// | 1 | bytes ratchet_key (33) |
/// | 2 | varint counter |
/// | 3 | varint previous_counter |
/// | 4 | bytes ciphertext |
/// | 5 | bytes pq_ratchet (optional) |
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalMessageProto {
    pub ratchet_key: Option<Vec<u8>>,
    pub counter: Option<u32>,
    pub previous_counter: Option<u32>,
    pub ciphertext: Option<Vec<u8>>,
    pub pq_ratchet: Option<Vec<u8>>,
}

impl SignalMessageProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_optional_bytes(1, self.ratchet_key.as_deref());
        w.write_optional_uint32(2, self.counter);
        w.write_optional_uint32(3, self.previous_counter);
        w.write_optional_bytes(4, self.ciphertext.as_deref());
        w.write_optional_bytes(5, self.pq_ratchet.as_deref());
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut proto = Self::default();
        let mut r = Reader::new(bytes);
        while let Some((field, value)) = r.read_field()? {
            match field {
                1 => proto.ratchet_key = Some(value.as_bytes(field)?.to_vec()),
                2 => proto.counter = Some(value.as_u32(field)?),
                3 => proto.previous_counter = Some(value.as_u32(field)?),
                4 => proto.ciphertext = Some(value.as_bytes(field)?.to_vec()),
                5 => proto.pq_ratchet = Some(value.as_bytes(field)?.to_vec()),
                _ => {}
            }
        }
        Ok(proto)
    }
}

/// Закодировать тело SignalMessage со всеми обязательными полями
/// (previous_counter = 0 тоже пишется).
pub fn encode_signal_message(
    ratchet_key: &[u8],
    counter: u32,
    previous_counter: u32,
    ciphertext: &[u8],
) -> Vec<u8> {
    SignalMessageProto {
        ratchet_key: Some(ratchet_key.to_vec()),
        counter: Some(counter),
        previous_counter: Some(previous_counter),
        ciphertext: Some(ciphertext.to_vec()),
        pq_ratchet: None,
    }
    .encode()
}

/// Тело PreKeySignalMessage
///
/// | field | тип |
/// |---|---|
/// | 1 | varint pre_key_id (optional) |
/// | 2 | bytes base_key (33) |
/// | 3 | bytes identity_key (33) |
/// | 4 | bytes message (SignalMessage целиком, с version byte и MAC) |
/// | 5 | varint registration_id |
/// | 6 | varint signed_pre_key_id |
/// | 7 | varint kyber_pre_key_id |
/// | 8 | bytes kyber_ciphertext |
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreKeySignalMessageProto {
    pub pre_key_id: Option<u32>,
    pub base_key: Option<Vec<u8>>,
    pub identity_key: Option<Vec<u8>>,
    pub message: Option<Vec<u8>>,
    pub registration_id: Option<u32>,
    pub signed_pre_key_id: Option<u32>,
    pub kyber_pre_key_id: Option<u32>,
    pub kyber_ciphertext: Option<Vec<u8>>,
}

impl PreKeySignalMessageProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_optional_uint32(1, self.pre_key_id);
        w.write_optional_bytes(2, self.base_key.as_deref());
        w.write_optional_bytes(3, self.identity_key.as_deref());
        w.write_optional_bytes(4, self.message.as_deref());
        w.write_optional_uint32(5, self.registration_id);
        w.write_optional_uint32(6, self.signed_pre_key_id);
        w.write_optional_uint32(7, self.kyber_pre_key_id);
        w.write_optional_bytes(8, self.kyber_ciphertext.as_deref());
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut proto = Self::default();
        let mut r = Reader::new(bytes);
        while let Some((field, value)) = r.read_field()? {
            match field {
                1 => proto.pre_key_id = Some(value.as_u32(field)?),
                2 => proto.base_key = Some(value.as_bytes(field)?.to_vec()),
                3 => proto.identity_key = Some(value.as_bytes(field)?.to_vec()),
                4 => proto.message = Some(value.as_bytes(field)?.to_vec()),
                5 => proto.registration_id = Some(value.as_u32(field)?),
                6 => proto.signed_pre_key_id = Some(value.as_u32(field)?),
                7 => proto.kyber_pre_key_id = Some(value.as_u32(field)?),
                8 => proto.kyber_ciphertext = Some(value.as_bytes(field)?.to_vec()),
                _ => {}
            }
        }
        Ok(proto)
    }
}
