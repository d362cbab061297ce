// Состояние одной сессии (SessionState)
//
// Типизированное представление SessionStructure: identity ключи, root key,
// одна sender chain, ограниченный набор receiver chains, pending pre-keys, PQ state.

use crate::config::Config;
use crate::crypto::keys::{IdentityKey, KeyPair, PrivateKey, PublicKey, SERIALIZED_PUBLIC_KEY_LENGTH};
use crate::crypto::ratchet::{pq_message_salt, ChainKey, MessageKeyGenerator, MessageKeys, RootKey};
use crate::crypto::CryptoProvider;
use crate::error::{RatchetError, Result};
use crate::protocol::structure::{
    ChainKeyStructure, ChainStructure, MessageKeyStructure, PendingKyberPreKeyStructure,
    PendingPreKeyStructure, SessionStructure,
};
use crate::utils::time::age_secs;
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;

/// Pre-key, использованный Alice при установке сессии; живёт до первого ответа Bob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPreKey {
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    pub base_key: PublicKey,
    /// Миллисекунды с начала эпохи
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingKyberPreKey {
    pub kyber_pre_key_id: u32,
    /// Сериализованный (с type byte) Kyber ciphertext
    pub ciphertext: Vec<u8>,
}

/// Одно направление ratchet
#[derive(Debug, Clone)]
pub struct Chain {
    sender_ratchet_key: PublicKey,
    /// Только у sender chain
    sender_ratchet_key_private: Option<PrivateKey>,
    chain_key: ChainKey,
    /// Skipped message keys по счётчику
    message_keys: BTreeMap<u32, MessageKeyGenerator>,
}

impl Chain {
    pub fn new_sender(key_pair: KeyPair, chain_key: ChainKey) -> Self {
        Self {
            sender_ratchet_key: key_pair.public_key,
            sender_ratchet_key_private: Some(key_pair.private_key),
            chain_key,
            message_keys: BTreeMap::new(),
        }
    }

    pub fn new_receiver(their_ratchet_key: PublicKey, chain_key: ChainKey) -> Self {
        Self {
            sender_ratchet_key: their_ratchet_key,
            sender_ratchet_key_private: None,
            chain_key,
            message_keys: BTreeMap::new(),
        }
    }

    pub fn ratchet_key(&self) -> &PublicKey {
        &self.sender_ratchet_key
    }

    pub fn chain_key(&self) -> &ChainKey {
        &self.chain_key
    }

    pub fn skipped_keys_len(&self) -> usize {
        self.message_keys.len()
    }

    fn to_structure(&self) -> ChainStructure {
        ChainStructure {
            sender_ratchet_key: self.sender_ratchet_key.serialize().to_vec(),
            sender_ratchet_key_private: self
                .sender_ratchet_key_private
                .as_ref()
                .map(|k| k.serialize().to_vec())
                .unwrap_or_default(),
            chain_key: Some(ChainKeyStructure {
                index: self.chain_key.index(),
                key: self.chain_key.key().to_vec(),
            }),
            message_keys: self
                .message_keys
                .values()
                .map(|generator| match generator {
                    MessageKeyGenerator::Seed { seed, counter } => MessageKeyStructure {
                        index: *counter,
                        seed: seed.to_vec(),
                        ..Default::default()
                    },
                    MessageKeyGenerator::Keys(keys) => MessageKeyStructure {
                        index: keys.counter(),
                        cipher_key: keys.cipher_key().to_vec(),
                        mac_key: keys.mac_key().to_vec(),
                        iv: keys.iv().to_vec(),
                        seed: Vec::new(),
                    },
                })
                .collect(),
        }
    }

    fn from_structure(chain: &ChainStructure) -> Result<Self> {
        let sender_ratchet_key = PublicKey::deserialize(&chain.sender_ratchet_key)?;
        let sender_ratchet_key_private = if chain.sender_ratchet_key_private.is_empty() {
            None
        } else {
            Some(PrivateKey::deserialize(&chain.sender_ratchet_key_private)?)
        };

        let chain_key = chain
            .chain_key
            .as_ref()
            .ok_or_else(|| RatchetError::InvalidSessionState("chain without chain key".into()))?;
        let chain_key = ChainKey::new(to_array(&chain_key.key, "chain key")?, chain_key.index);

        let mut message_keys = BTreeMap::new();
        for key in &chain.message_keys {
            let generator = if !key.seed.is_empty() {
                MessageKeyGenerator::Seed {
                    seed: to_array(&key.seed, "message key seed")?,
                    counter: key.index,
                }
            } else {
                MessageKeyGenerator::Keys(MessageKeys::new(
                    to_array(&key.cipher_key, "cipher key")?,
                    to_array(&key.mac_key, "mac key")?,
                    to_array(&key.iv, "iv")?,
                    key.index,
                ))
            };
            message_keys.insert(key.index, generator);
        }

        Ok(Self {
            sender_ratchet_key,
            sender_ratchet_key_private,
            chain_key,
            message_keys,
        })
    }
}

fn to_array<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        RatchetError::InvalidSessionState(format!("invalid {} length: {}", what, bytes.len()))
    })
}

/// Одна сессия Triple Ratchet
#[derive(Debug, Clone)]
pub struct SessionState {
    session_version: u32,
    local_identity: IdentityKey,
    remote_identity: IdentityKey,
    root_key: RootKey,
    previous_counter: u32,
    sender_chain: Option<Chain>,
    /// Старые первыми; при переполнении вытесняется `receiver_chains[0]`
    receiver_chains: Vec<Chain>,
    pending_pre_key: Option<PendingPreKey>,
    pending_kyber_pre_key: Option<PendingKyberPreKey>,
    remote_registration_id: u32,
    local_registration_id: u32,
    /// Сериализованный base key Alice (33 байта; старые записи могут хранить 32)
    alice_base_key: Vec<u8>,
    /// pqRootKey из PQXDH; пусто = без PQ соли
    pq_ratchet_state: Vec<u8>,
}

impl SessionState {
    pub fn new(
        session_version: u32,
        local_identity: IdentityKey,
        remote_identity: IdentityKey,
        root_key: RootKey,
        alice_base_key: &PublicKey,
    ) -> Self {
        Self {
            session_version,
            local_identity,
            remote_identity,
            root_key,
            previous_counter: 0,
            sender_chain: None,
            receiver_chains: Vec::new(),
            pending_pre_key: None,
            pending_kyber_pre_key: None,
            remote_registration_id: 0,
            local_registration_id: 0,
            alice_base_key: alice_base_key.serialize().to_vec(),
            pq_ratchet_state: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Identity / metadata
    // ------------------------------------------------------------------

    pub fn session_version(&self) -> u32 {
        self.session_version
    }

    pub fn local_identity_key(&self) -> &IdentityKey {
        &self.local_identity
    }

    pub fn remote_identity_key(&self) -> &IdentityKey {
        &self.remote_identity
    }

    pub fn local_registration_id(&self) -> u32 {
        self.local_registration_id
    }

    pub fn set_local_registration_id(&mut self, id: u32) {
        self.local_registration_id = id;
    }

    pub fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    pub fn set_remote_registration_id(&mut self, id: u32) {
        self.remote_registration_id = id;
    }

    pub fn alice_base_key(&self) -> &[u8] {
        &self.alice_base_key
    }

    /// Сравнение base key за константное время; `base_key` уже нормализован к 33 байтам
    pub(crate) fn alice_base_key_matches(&self, base_key: &[u8]) -> bool {
        let stored = normalize_base_key(&self.alice_base_key);
        stored.len() == base_key.len() && bool::from(stored.as_slice().ct_eq(base_key))
    }

    pub fn root_key(&self) -> &RootKey {
        &self.root_key
    }

    pub fn set_root_key(&mut self, root_key: RootKey) {
        self.root_key = root_key;
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub fn set_previous_counter(&mut self, counter: u32) {
        self.previous_counter = counter;
    }

    pub fn pq_ratchet_state(&self) -> &[u8] {
        &self.pq_ratchet_state
    }

    pub fn set_pq_ratchet_state(&mut self, state: Vec<u8>) {
        self.pq_ratchet_state = state;
    }

    /// Соль MessageKeys для сообщения `counter` в цепочке `ratchet_key`
    pub fn pq_salt<P: CryptoProvider>(
        &self,
        ratchet_key: &PublicKey,
        counter: u32,
    ) -> Result<Option<[u8; 32]>> {
        Ok(pq_message_salt::<P>(&self.pq_ratchet_state, ratchet_key, counter)?)
    }

    // ------------------------------------------------------------------
    // Sender chain
    // ------------------------------------------------------------------

    pub fn has_sender_chain(&self) -> bool {
        self.sender_chain.is_some()
    }

    /// Есть sender chain, и сессия не зависла в pending дольше лимита
    pub fn has_usable_sender_chain(&self, now_ms: u64) -> bool {
        if self.sender_chain.is_none() {
            return false;
        }
        match &self.pending_pre_key {
            Some(pending) => {
                age_secs(pending.timestamp, now_ms)
                    <= Config::global().max_unacknowledged_session_age_secs
            }
            None => true,
        }
    }

    pub fn set_sender_chain(&mut self, key_pair: KeyPair, chain_key: ChainKey) {
        self.sender_chain = Some(Chain::new_sender(key_pair, chain_key));
    }

    fn sender_chain(&self) -> Result<&Chain> {
        self.sender_chain
            .as_ref()
            .ok_or_else(|| RatchetError::InvalidSessionState("missing sender chain".into()))
    }

    pub fn sender_ratchet_key(&self) -> Result<PublicKey> {
        Ok(*self.sender_chain()?.ratchet_key())
    }

    pub fn sender_ratchet_private_key(&self) -> Result<PrivateKey> {
        self.sender_chain()?
            .sender_ratchet_key_private
            .clone()
            .ok_or_else(|| RatchetError::InvalidSessionState("missing sender ratchet private key".into()))
    }

    pub fn sender_chain_key(&self) -> Result<ChainKey> {
        Ok(self.sender_chain()?.chain_key.clone())
    }

    pub fn set_sender_chain_key(&mut self, chain_key: ChainKey) -> Result<()> {
        let chain = self
            .sender_chain
            .as_mut()
            .ok_or_else(|| RatchetError::InvalidSessionState("missing sender chain".into()))?;
        chain.chain_key = chain_key;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Receiver chains
    // ------------------------------------------------------------------

    pub fn receiver_chain_count(&self) -> usize {
        self.receiver_chains.len()
    }

    fn receiver_chain(&self, their_ratchet_key: &PublicKey) -> Option<&Chain> {
        self.receiver_chains
            .iter()
            .find(|chain| chain.sender_ratchet_key == *their_ratchet_key)
    }

    fn receiver_chain_mut(&mut self, their_ratchet_key: &PublicKey) -> Option<&mut Chain> {
        self.receiver_chains
            .iter_mut()
            .find(|chain| chain.sender_ratchet_key == *their_ratchet_key)
    }

    pub fn receiver_chain_key(&self, their_ratchet_key: &PublicKey) -> Option<ChainKey> {
        self.receiver_chain(their_ratchet_key)
            .map(|chain| chain.chain_key.clone())
    }

    pub fn skipped_message_keys_len(&self, their_ratchet_key: &PublicKey) -> usize {
        self.receiver_chain(their_ratchet_key)
            .map(Chain::skipped_keys_len)
            .unwrap_or(0)
    }

    /// Добавить receiver chain; самая старая цепочка вытесняется при переполнении
    pub fn add_receiver_chain(&mut self, their_ratchet_key: PublicKey, chain_key: ChainKey) {
        use tracing::warn;

        self.receiver_chains
            .push(Chain::new_receiver(their_ratchet_key, chain_key));

        let max_chains = Config::global().max_receiver_chains.max(1);
        while self.receiver_chains.len() > max_chains {
            let evicted = self.receiver_chains.remove(0);
            warn!(
                target: "crypto::session",
                ratchet_key = %evicted.sender_ratchet_key.fingerprint(),
                skipped_keys = evicted.message_keys.len(),
                "Evicting oldest receiver chain"
            );
        }
    }

    pub fn set_receiver_chain_key(
        &mut self,
        their_ratchet_key: &PublicKey,
        chain_key: ChainKey,
    ) -> Result<()> {
        let chain = self
            .receiver_chain_mut(their_ratchet_key)
            .ok_or_else(|| RatchetError::InvalidSessionState("missing receiver chain".into()))?;
        chain.chain_key = chain_key;
        Ok(())
    }

    /// Забрать skipped message key (удаляется: повторно использовать нельзя)
    pub fn take_message_keys(
        &mut self,
        their_ratchet_key: &PublicKey,
        counter: u32,
    ) -> Option<MessageKeyGenerator> {
        self.receiver_chain_mut(their_ratchet_key)?
            .message_keys
            .remove(&counter)
    }

    pub fn set_message_keys(
        &mut self,
        their_ratchet_key: &PublicKey,
        generator: MessageKeyGenerator,
    ) -> Result<()> {
        let chain = self
            .receiver_chain_mut(their_ratchet_key)
            .ok_or_else(|| RatchetError::InvalidSessionState("missing receiver chain".into()))?;
        chain.message_keys.insert(generator.counter(), generator);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pending pre-keys
    // ------------------------------------------------------------------

    pub fn set_pending_pre_key(
        &mut self,
        pre_key_id: Option<u32>,
        signed_pre_key_id: u32,
        base_key: PublicKey,
        timestamp: u64,
    ) {
        self.pending_pre_key = Some(PendingPreKey {
            pre_key_id,
            signed_pre_key_id,
            base_key,
            timestamp,
        });
    }

    pub fn pending_pre_key(&self) -> Option<&PendingPreKey> {
        self.pending_pre_key.as_ref()
    }

    pub fn set_pending_kyber_pre_key(&mut self, kyber_pre_key_id: u32, ciphertext: Vec<u8>) {
        self.pending_kyber_pre_key = Some(PendingKyberPreKey {
            kyber_pre_key_id,
            ciphertext,
        });
    }

    pub fn pending_kyber_pre_key(&self) -> Option<&PendingKyberPreKey> {
        self.pending_kyber_pre_key.as_ref()
    }

    /// Сессия подтверждена ответом собеседника
    pub fn clear_unacknowledged_pre_key_message(&mut self) {
        self.pending_pre_key = None;
        self.pending_kyber_pre_key = None;
    }

    // ------------------------------------------------------------------
    // Сериализация
    // ------------------------------------------------------------------

    pub fn to_structure(&self) -> SessionStructure {
        SessionStructure {
            session_version: self.session_version,
            local_identity_public: self.local_identity.serialize().to_vec(),
            remote_identity_public: self.remote_identity.serialize().to_vec(),
            root_key: self.root_key.key().to_vec(),
            previous_counter: self.previous_counter,
            sender_chain: self.sender_chain.as_ref().map(Chain::to_structure),
            receiver_chains: self.receiver_chains.iter().map(Chain::to_structure).collect(),
            pending_pre_key: self.pending_pre_key.as_ref().map(|p| PendingPreKeyStructure {
                pre_key_id: p.pre_key_id,
                base_key: p.base_key.serialize().to_vec(),
                signed_pre_key_id: p.signed_pre_key_id,
                timestamp: p.timestamp,
            }),
            remote_registration_id: self.remote_registration_id,
            local_registration_id: self.local_registration_id,
            alice_base_key: self.alice_base_key.clone(),
            pending_kyber_pre_key: self.pending_kyber_pre_key.as_ref().map(|p| {
                PendingKyberPreKeyStructure {
                    pre_key_id: p.kyber_pre_key_id,
                    ciphertext: p.ciphertext.clone(),
                }
            }),
            pq_ratchet_state: self.pq_ratchet_state.clone(),
        }
    }

    pub fn from_structure(structure: &SessionStructure) -> Result<Self> {
        let pending_pre_key = match &structure.pending_pre_key {
            Some(p) => Some(PendingPreKey {
                pre_key_id: p.pre_key_id,
                signed_pre_key_id: p.signed_pre_key_id,
                base_key: PublicKey::deserialize(&p.base_key)?,
                timestamp: p.timestamp,
            }),
            None => None,
        };

        Ok(Self {
            session_version: structure.session_version,
            local_identity: IdentityKey::deserialize(&structure.local_identity_public)?,
            remote_identity: IdentityKey::deserialize(&structure.remote_identity_public)?,
            root_key: RootKey::new(to_array(&structure.root_key, "root key")?),
            previous_counter: structure.previous_counter,
            sender_chain: structure
                .sender_chain
                .as_ref()
                .map(Chain::from_structure)
                .transpose()?,
            receiver_chains: structure
                .receiver_chains
                .iter()
                .map(Chain::from_structure)
                .collect::<Result<_>>()?,
            pending_pre_key,
            pending_kyber_pre_key: structure.pending_kyber_pre_key.as_ref().map(|p| {
                PendingKyberPreKey {
                    kyber_pre_key_id: p.pre_key_id,
                    ciphertext: p.ciphertext.clone(),
                }
            }),
            remote_registration_id: structure.remote_registration_id,
            local_registration_id: structure.local_registration_id,
            alice_base_key: structure.alice_base_key.clone(),
            pq_ratchet_state: structure.pq_ratchet_state.clone(),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.to_structure().encode()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Self::from_structure(&SessionStructure::decode(bytes)?)
    }
}

/// Base key в сохранённой форме: голый 32-байтовый ключ получает префикс `0x05`
pub(crate) fn normalize_base_key(base_key: &[u8]) -> Vec<u8> {
    if base_key.len() == SERIALIZED_PUBLIC_KEY_LENGTH - 1 {
        let mut out = Vec::with_capacity(SERIALIZED_PUBLIC_KEY_LENGTH);
        out.push(crate::crypto::keys::DJB_TYPE);
        out.extend_from_slice(base_key);
        out
    } else {
        base_key.to_vec()
    }
}
