//! Формат хранения сессий (protobuf, proto3-семантика: значения по умолчанию не пишутся)
//!
//! ```text
//! RecordStructure
//!  ├─ 1 current_session: SessionStructure
//!  └─ 2 previous_sessions: repeated bytes (сериализованные SessionStructure, новые первыми)
//!
//! SessionStructure
//!  ├─ 1 session_version          ├─ 9  pending_pre_key: PendingPreKey
//!  ├─ 2 local_identity_public    ├─ 10 remote_registration_id
//!  ├─ 3 remote_identity_public   ├─ 11 local_registration_id
//!  ├─ 4 root_key                 ├─ 13 alice_base_key
//!  ├─ 5 previous_counter         ├─ 14 pending_kyber_pre_key: PendingKyberPreKey
//!  ├─ 6 sender_chain: Chain      └─ 15 pq_ratchet_state
//!  └─ 7 receiver_chains: repeated Chain
//! ```
//!
//! Поля 8 и 12 не используются.

use crate::protocol::codec::{CodecError, Reader, Writer};

/// Chain.chain_key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainKeyStructure {
    pub index: u32,
    pub key: Vec<u8>,
}

impl ChainKeyStructure {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_uint32_nonzero(1, self.index);
        w.write_bytes_nonempty(2, &self.key);
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut s = Self::default();
        let mut r = Reader::new(bytes);
        while let Some((field, value)) = r.read_field()? {
            match field {
                1 => s.index = value.as_u32(field)?,
                2 => s.key = value.as_bytes(field)?.to_vec(),
                _ => {}
            }
        }
        Ok(s)
    }
}

/// Chain.message_keys: либо legacy cipher/mac/iv (2-4), либо seed (5)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageKeyStructure {
    pub index: u32,
    pub cipher_key: Vec<u8>,
    pub mac_key: Vec<u8>,
    pub iv: Vec<u8>,
    pub seed: Vec<u8>,
}

impl MessageKeyStructure {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_uint32_nonzero(1, self.index);
        w.write_bytes_nonempty(2, &self.cipher_key);
        w.write_bytes_nonempty(3, &self.mac_key);
        w.write_bytes_nonempty(4, &self.iv);
        w.write_bytes_nonempty(5, &self.seed);
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut s = Self::default();
        let mut r = Reader::new(bytes);
        while let Some((field, value)) = r.read_field()? {
            match field {
                1 => s.index = value.as_u32(field)?,
                2 => s.cipher_key = value.as_bytes(field)?.to_vec(),
                3 => s.mac_key = value.as_bytes(field)?.to_vec(),
                4 => s.iv = value.as_bytes(field)?.to_vec(),
                5 => s.seed = value.as_bytes(field)?.to_vec(),
                _ => {}
            }
        }
        Ok(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainStructure {
    pub sender_ratchet_key: Vec<u8>,
    pub sender_ratchet_key_private: Vec<u8>,
    pub chain_key: Option<ChainKeyStructure>,
    pub message_keys: Vec<MessageKeyStructure>,
}

impl ChainStructure {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_bytes_nonempty(1, &self.sender_ratchet_key);
        w.write_bytes_nonempty(2, &self.sender_ratchet_key_private);
        if let Some(chain_key) = &self.chain_key {
            w.write_bytes(3, &chain_key.encode());
        }
        for message_key in &self.message_keys {
            w.write_bytes(4, &message_key.encode());
        }
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut s = Self::default();
        let mut r = Reader::new(bytes);
        while let Some((field, value)) = r.read_field()? {
            match field {
                1 => s.sender_ratchet_key = value.as_bytes(field)?.to_vec(),
                2 => s.sender_ratchet_key_private = value.as_bytes(field)?.to_vec(),
                3 => s.chain_key = Some(ChainKeyStructure::decode(value.as_bytes(field)?)?),
                4 => s
                    .message_keys
                    .push(MessageKeyStructure::decode(value.as_bytes(field)?)?),
                _ => {}
            }
        }
        Ok(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingPreKeyStructure {
    pub pre_key_id: Option<u32>,
    pub base_key: Vec<u8>,
    pub signed_pre_key_id: u32,
    pub timestamp: u64,
}

impl PendingPreKeyStructure {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_optional_uint32(1, self.pre_key_id);
        w.write_bytes_nonempty(2, &self.base_key);
        w.write_uint32_nonzero(3, self.signed_pre_key_id);
        w.write_uint64_nonzero(4, self.timestamp);
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut s = Self::default();
        let mut r = Reader::new(bytes);
        while let Some((field, value)) = r.read_field()? {
            match field {
                1 => s.pre_key_id = Some(value.as_u32(field)?),
                2 => s.base_key = value.as_bytes(field)?.to_vec(),
                3 => s.signed_pre_key_id = value.as_u32(field)?,
                // varint или fixed64
                4 => s.timestamp = value.as_u64(field)?,
                _ => {}
            }
        }
        Ok(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingKyberPreKeyStructure {
    pub pre_key_id: u32,
    pub ciphertext: Vec<u8>,
}

impl PendingKyberPreKeyStructure {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_uint32_nonzero(1, self.pre_key_id);
        w.write_bytes_nonempty(2, &self.ciphertext);
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut s = Self::default();
        let mut r = Reader::new(bytes);
        while let Some((field, value)) = r.read_field()? {
            match field {
                1 => s.pre_key_id = value.as_u32(field)?,
                2 => s.ciphertext = value.as_bytes(field)?.to_vec(),
                _ => {}
            }
        }
        Ok(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStructure {
    pub session_version: u32,
    pub local_identity_public: Vec<u8>,
    pub remote_identity_public: Vec<u8>,
    pub root_key: Vec<u8>,
    pub previous_counter: u32,
    pub sender_chain: Option<ChainStructure>,
    pub receiver_chains: Vec<ChainStructure>,
    pub pending_pre_key: Option<PendingPreKeyStructure>,
    pub remote_registration_id: u32,
    pub local_registration_id: u32,
    pub alice_base_key: Vec<u8>,
    pub pending_kyber_pre_key: Option<PendingKyberPreKeyStructure>,
    pub pq_ratchet_state: Vec<u8>,
}

impl SessionStructure {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_uint32_nonzero(1, self.session_version);
        w.write_bytes_nonempty(2, &self.local_identity_public);
        w.write_bytes_nonempty(3, &self.remote_identity_public);
        w.write_bytes_nonempty(4, &self.root_key);
        w.write_uint32_nonzero(5, self.previous_counter);
        if let Some(chain) = &self.sender_chain {
            w.write_bytes(6, &chain.encode());
        }
        for chain in &self.receiver_chains {
            w.write_bytes(7, &chain.encode());
        }
        if let Some(pending) = &self.pending_pre_key {
            w.write_bytes(9, &pending.encode());
        }
        w.write_uint32_nonzero(10, self.remote_registration_id);
        w.write_uint32_nonzero(11, self.local_registration_id);
        w.write_bytes_nonempty(13, &self.alice_base_key);
        if let Some(pending) = &self.pending_kyber_pre_key {
            w.write_bytes(14, &pending.encode());
        }
        w.write_bytes_nonempty(15, &self.pq_ratchet_state);
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut s = Self::default();
        let mut r = Reader::new(bytes);
        while let Some((field, value)) = r.read_field()? {
            match field {
                1 => s.session_version = value.as_u32(field)?,
                2 => s.local_identity_public = value.as_bytes(field)?.to_vec(),
                3 => s.remote_identity_public = value.as_bytes(field)?.to_vec(),
                4 => s.root_key = value.as_bytes(field)?.to_vec(),
                5 => s.previous_counter = value.as_u32(field)?,
                6 => s.sender_chain = Some(ChainStructure::decode(value.as_bytes(field)?)?),
                7 => s
                    .receiver_chains
                    .push(ChainStructure::decode(value.as_bytes(field)?)?),
                9 => {
                    s.pending_pre_key =
                        Some(PendingPreKeyStructure::decode(value.as_bytes(field)?)?)
                }
                10 => s.remote_registration_id = value.as_u32(field)?,
                11 => s.local_registration_id = value.as_u32(field)?,
                13 => s.alice_base_key = value.as_bytes(field)?.to_vec(),
                14 => {
                    s.pending_kyber_pre_key =
                        Some(PendingKyberPreKeyStructure::decode(value.as_bytes(field)?)?)
                }
                15 => s.pq_ratchet_state = value.as_bytes(field)?.to_vec(),
                _ => {}
            }
        }
        Ok(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordStructure {
    pub current_session: Option<SessionStructure>,
    pub previous_sessions: Vec<Vec<u8>>,
}

impl RecordStructure {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(session) = &self.current_session {
            w.write_bytes(1, &session.encode());
        }
        for previous in &self.previous_sessions {
            w.write_bytes(2, previous);
        }
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut s = Self::default();
        let mut r = Reader::new(bytes);
        while let Some((field, value)) = r.read_field()? {
            match field {
                1 => s.current_session = Some(SessionStructure::decode(value.as_bytes(field)?)?),
                2 => s.previous_sessions.push(value.as_bytes(field)?.to_vec()),
                _ => {}
            }
        }
        Ok(s)
    }
}
