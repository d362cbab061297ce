// Pre-key bundle, публикуемый на сервере ключей

use crate::crypto::keys::{IdentityKey, KemPublicKey, PublicKey};
use crate::error::{RatchetError, Result};
use crate::state::prekeys::{KyberPreKeyRecord, PreKeyRecord, SignedPreKeyRecord};
use serde::{Deserialize, Serialize};

/// Публичные ключи Bob, нужные Alice для PQXDH
///
/// Ключи хранятся в сериализованной форме (с type byte), как они
/// передаются через сервер; типизированные значения разбираются по запросу.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub device_id: u32,
    pub pre_key_id: Option<u32>,
    #[serde(default, with = "serde_bytes")]
    pub pre_key_public: Option<Vec<u8>>,
    pub signed_pre_key_id: u32,
    #[serde(with = "serde_bytes")]
    pub signed_pre_key_public: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub signed_pre_key_signature: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub identity_key: Vec<u8>,
    pub kyber_pre_key_id: u32,
    #[serde(with = "serde_bytes")]
    pub kyber_pre_key_public: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub kyber_pre_key_signature: Vec<u8>,
}

impl PreKeyBundle {
    /// Собрать bundle из локальных записей (сторона Bob)
    pub fn new(
        registration_id: u32,
        device_id: u32,
        pre_key: Option<&PreKeyRecord>,
        signed_pre_key: &SignedPreKeyRecord,
        kyber_pre_key: &KyberPreKeyRecord,
        identity_key: &IdentityKey,
    ) -> Self {
        Self {
            registration_id,
            device_id,
            pre_key_id: pre_key.map(|k| k.id),
            pre_key_public: pre_key.map(|k| k.key_pair.public_key.serialize().to_vec()),
            signed_pre_key_id: signed_pre_key.id,
            signed_pre_key_public: signed_pre_key.key_pair.public_key.serialize().to_vec(),
            signed_pre_key_signature: signed_pre_key.signature.clone(),
            identity_key: identity_key.serialize().to_vec(),
            kyber_pre_key_id: kyber_pre_key.id,
            kyber_pre_key_public: kyber_pre_key.key_pair.public_key.serialize(),
            kyber_pre_key_signature: kyber_pre_key.signature.clone(),
        }
    }

    /// One-time pre-key; id без ключа (или наоборот) — `InvalidKey`
    pub fn pre_key(&self) -> Result<Option<(u32, PublicKey)>> {
        match (self.pre_key_id, &self.pre_key_public) {
            (Some(id), Some(bytes)) => Ok(Some((id, PublicKey::deserialize(bytes)?))),
            (None, None) => Ok(None),
            (Some(id), None) => Err(RatchetError::InvalidKey(format!(
                "pre-key {} without public key",
                id
            ))),
            (None, Some(_)) => Err(RatchetError::InvalidKey(
                "pre-key public key without id".to_string(),
            )),
        }
    }

    pub fn signed_pre_key(&self) -> Result<PublicKey> {
        Ok(PublicKey::deserialize(&self.signed_pre_key_public)?)
    }

    pub fn identity_key(&self) -> Result<IdentityKey> {
        Ok(IdentityKey::deserialize(&self.identity_key)?)
    }

    pub fn kyber_pre_key(&self) -> Result<KemPublicKey> {
        Ok(KemPublicKey::deserialize(&self.kyber_pre_key_public)?)
    }
}
