// Типы сообщений протокола
//
// Сериализованная форма:
//   SignalMessage        = version_byte ‖ SignalMessageProto ‖ MAC(8)
//   PreKeySignalMessage  = version_byte ‖ PreKeySignalMessageProto
// version_byte = (message_version << 4) | CIPHERTEXT_MESSAGE_CURRENT_VERSION

use crate::crypto::keys::{IdentityKey, PublicKey};
use crate::crypto::{
    CryptoProvider, CIPHERTEXT_MESSAGE_CURRENT_VERSION, MAC_LENGTH, PREKEY_MESSAGE_VERSION,
    SIGNAL_MESSAGE_VERSION,
};
use crate::error::{RatchetError, Result};
use crate::protocol::wire::{PreKeySignalMessageProto, SignalMessageProto};
use subtle::ConstantTimeEq;

/// Младший полубайт, который мы принимаем
const ACCEPTED_CURRENT_VERSIONS: [u8; 2] = [3, CIPHERTEXT_MESSAGE_CURRENT_VERSION];

fn version_byte(message_version: u8) -> u8 {
    (message_version << 4) | CIPHERTEXT_MESSAGE_CURRENT_VERSION
}

/// Разобрать version byte: возвращает message_version (старший полубайт)
fn parse_version_byte(byte: u8) -> Result<u8> {
    if !ACCEPTED_CURRENT_VERSIONS.contains(&(byte & 0x0F)) {
        return Err(RatchetError::InvalidMessage(format!(
            "unrecognized version byte 0x{:02x}",
            byte
        )));
    }
    Ok(byte >> 4)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CiphertextMessageType {
    Whisper = 2,
    PreKey = 3,
}

// ============================================================================
// SignalMessage
// ============================================================================

#[derive(Debug, Clone)]
pub struct SignalMessage {
    message_version: u8,
    sender_ratchet_key: PublicKey,
    counter: u32,
    previous_counter: u32,
    ciphertext: Vec<u8>,
    pq_ratchet: Option<Vec<u8>>,
    serialized: Vec<u8>,
}

impl SignalMessage {
    #[allow(clippy::too_many_arguments)]
    pub fn new<P: CryptoProvider>(
        message_version: u8,
        mac_key: &[u8; 32],
        sender_ratchet_key: PublicKey,
        counter: u32,
        previous_counter: u32,
        ciphertext: Vec<u8>,
        sender_identity_key: &IdentityKey,
        receiver_identity_key: &IdentityKey,
    ) -> Result<Self> {
        let proto = SignalMessageProto {
            ratchet_key: Some(sender_ratchet_key.serialize().to_vec()),
            counter: Some(counter),
            previous_counter: Some(previous_counter),
            ciphertext: Some(ciphertext.clone()),
            pq_ratchet: None,
        };

        let mut serialized = Vec::with_capacity(1 + ciphertext.len() + 64 + MAC_LENGTH);
        serialized.push(version_byte(message_version));
        serialized.extend_from_slice(&proto.encode());
        let mac = Self::compute_mac::<P>(
            sender_identity_key,
            receiver_identity_key,
            mac_key,
            &serialized,
        )?;
        serialized.extend_from_slice(&mac);

        Ok(Self {
            message_version,
            sender_ratchet_key,
            counter,
            previous_counter,
            ciphertext,
            pq_ratchet: None,
            serialized,
        })
    }

    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    pub fn sender_ratchet_key(&self) -> &PublicKey {
        &self.sender_ratchet_key
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub fn body(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn pq_ratchet(&self) -> Option<&[u8]> {
        self.pq_ratchet.as_deref()
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }

    /// Проверка MAC за константное время
    pub fn verify_mac<P: CryptoProvider>(
        &self,
        sender_identity_key: &IdentityKey,
        receiver_identity_key: &IdentityKey,
        mac_key: &[u8; 32],
    ) -> Result<bool> {
        let split = self.serialized.len() - MAC_LENGTH;
        let our_mac = Self::compute_mac::<P>(
            sender_identity_key,
            receiver_identity_key,
            mac_key,
            &self.serialized[..split],
        )?;
        let their_mac = &self.serialized[split..];
        Ok(bool::from(our_mac.ct_eq(their_mac)))
    }

    fn compute_mac<P: CryptoProvider>(
        sender_identity_key: &IdentityKey,
        receiver_identity_key: &IdentityKey,
        mac_key: &[u8; 32],
        message: &[u8],
    ) -> Result<[u8; MAC_LENGTH]> {
        let full = P::hmac(
            mac_key,
            &[
                &sender_identity_key.serialize(),
                &receiver_identity_key.serialize(),
                message,
            ],
        )?;
        let mut mac = [0u8; MAC_LENGTH];
        mac.copy_from_slice(&full[..MAC_LENGTH]);
        Ok(mac)
    }
}

impl TryFrom<&[u8]> for SignalMessage {
    type Error = RatchetError;

    fn try_from(value: &[u8]) -> Result<Self> {
        if value.len() < 1 + MAC_LENGTH {
            return Err(RatchetError::InvalidMessage("SignalMessage too short".into()));
        }
        let message_version = parse_version_byte(value[0])?;
        if message_version != SIGNAL_MESSAGE_VERSION {
            return Err(RatchetError::InvalidMessage(format!(
                "not a SignalMessage (version {})",
                message_version
            )));
        }

        let proto = SignalMessageProto::decode(&value[1..value.len() - MAC_LENGTH])?;
        let ratchet_key = proto
            .ratchet_key
            .ok_or_else(|| RatchetError::InvalidMessage("missing ratchet key".into()))?;
        let counter = proto
            .counter
            .ok_or_else(|| RatchetError::InvalidMessage("missing counter".into()))?;
        let ciphertext = proto
            .ciphertext
            .ok_or_else(|| RatchetError::InvalidMessage("missing ciphertext".into()))?;
        let sender_ratchet_key = PublicKey::deserialize(&ratchet_key)
            .map_err(|e| RatchetError::InvalidMessage(e.to_string()))?;

        Ok(Self {
            message_version,
            sender_ratchet_key,
            counter,
            previous_counter: proto.previous_counter.unwrap_or(0),
            ciphertext,
            pq_ratchet: proto.pq_ratchet,
            serialized: value.to_vec(),
        })
    }
}

// ============================================================================
// PreKeySignalMessage
// ============================================================================

#[derive(Debug, Clone)]
pub struct PreKeySignalMessage {
    message_version: u8,
    registration_id: u32,
    pre_key_id: Option<u32>,
    signed_pre_key_id: u32,
    kyber_pre_key_id: u32,
    kyber_ciphertext: Vec<u8>,
    base_key: PublicKey,
    identity_key: IdentityKey,
    message: SignalMessage,
    serialized: Vec<u8>,
}

impl PreKeySignalMessage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registration_id: u32,
        pre_key_id: Option<u32>,
        signed_pre_key_id: u32,
        kyber_pre_key_id: u32,
        kyber_ciphertext: Vec<u8>,
        base_key: PublicKey,
        identity_key: IdentityKey,
        message: SignalMessage,
    ) -> Self {
        let proto = PreKeySignalMessageProto {
            pre_key_id,
            base_key: Some(base_key.serialize().to_vec()),
            identity_key: Some(identity_key.serialize().to_vec()),
            message: Some(message.serialized().to_vec()),
            registration_id: Some(registration_id),
            signed_pre_key_id: Some(signed_pre_key_id),
            kyber_pre_key_id: Some(kyber_pre_key_id),
            kyber_ciphertext: Some(kyber_ciphertext.clone()),
        };

        let mut serialized = vec![version_byte(PREKEY_MESSAGE_VERSION)];
        serialized.extend_from_slice(&proto.encode());

        Self {
            message_version: PREKEY_MESSAGE_VERSION,
            registration_id,
            pre_key_id,
            signed_pre_key_id,
            kyber_pre_key_id,
            kyber_ciphertext,
            base_key,
            identity_key,
            message,
            serialized,
        }
    }

    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn pre_key_id(&self) -> Option<u32> {
        self.pre_key_id
    }

    pub fn signed_pre_key_id(&self) -> u32 {
        self.signed_pre_key_id
    }

    pub fn kyber_pre_key_id(&self) -> u32 {
        self.kyber_pre_key_id
    }

    pub fn kyber_ciphertext(&self) -> &[u8] {
        &self.kyber_ciphertext
    }

    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    pub fn message(&self) -> &SignalMessage {
        &self.message
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for PreKeySignalMessage {
    type Error = RatchetError;

    fn try_from(value: &[u8]) -> Result<Self> {
        let (&first, body) = value
            .split_first()
            .ok_or_else(|| RatchetError::InvalidMessage("empty PreKeySignalMessage".into()))?;
        let message_version = parse_version_byte(first)?;
        if message_version != PREKEY_MESSAGE_VERSION {
            return Err(RatchetError::InvalidMessage(format!(
                "not a PreKeySignalMessage (version {})",
                message_version
            )));
        }

        let proto = PreKeySignalMessageProto::decode(body)?;
        let missing = |what: &str| RatchetError::InvalidMessage(format!("missing {}", what));

        let base_key = proto.base_key.ok_or_else(|| missing("base key"))?;
        let identity_key = proto.identity_key.ok_or_else(|| missing("identity key"))?;
        let message = proto.message.ok_or_else(|| missing("message"))?;
        let signed_pre_key_id = proto
            .signed_pre_key_id
            .ok_or_else(|| missing("signed pre-key id"))?;
        let kyber_pre_key_id = proto
            .kyber_pre_key_id
            .ok_or_else(|| missing("kyber pre-key id"))?;
        let kyber_ciphertext = proto
            .kyber_ciphertext
            .ok_or_else(|| missing("kyber ciphertext"))?;

        let base_key = PublicKey::deserialize(&base_key)
            .map_err(|e| RatchetError::InvalidMessage(e.to_string()))?;
        let identity_key = IdentityKey::deserialize(&identity_key)
            .map_err(|e| RatchetError::InvalidMessage(e.to_string()))?;

        Ok(Self {
            message_version,
            registration_id: proto.registration_id.unwrap_or(0),
            pre_key_id: proto.pre_key_id,
            signed_pre_key_id,
            kyber_pre_key_id,
            kyber_ciphertext,
            base_key,
            identity_key,
            message: SignalMessage::try_from(message.as_slice())?,
            serialized: value.to_vec(),
        })
    }
}

// ============================================================================
// CiphertextMessage
// ============================================================================

/// Закрытый набор сообщений: тип определяется один раз по version byte
#[derive(Debug, Clone)]
pub enum CiphertextMessage {
    SignalMessage(SignalMessage),
    PreKeySignalMessage(PreKeySignalMessage),
}

impl CiphertextMessage {
    pub fn message_type(&self) -> CiphertextMessageType {
        match self {
            CiphertextMessage::SignalMessage(_) => CiphertextMessageType::Whisper,
            CiphertextMessage::PreKeySignalMessage(_) => CiphertextMessageType::PreKey,
        }
    }

    pub fn serialize(&self) -> &[u8] {
        match self {
            CiphertextMessage::SignalMessage(m) => m.serialized(),
            CiphertextMessage::PreKeySignalMessage(m) => m.serialized(),
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let first = *bytes
            .first()
            .ok_or_else(|| RatchetError::InvalidMessage("empty message".into()))?;

        match parse_version_byte(first)? {
            SIGNAL_MESSAGE_VERSION => Ok(CiphertextMessage::SignalMessage(
                SignalMessage::try_from(bytes)?,
            )),
            PREKEY_MESSAGE_VERSION => Ok(CiphertextMessage::PreKeySignalMessage(
                PreKeySignalMessage::try_from(bytes)?,
            )),
            other => Err(RatchetError::InvalidMessage(format!(
                "unknown message version {}",
                other
            ))),
        }
    }
}
