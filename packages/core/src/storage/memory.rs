// In-memory хранилища для тестов и однопроцессных клиентов

use crate::crypto::keys::{IdentityKey, IdentityKeyPair};
use crate::error::{RatchetError, Result};
use crate::state::prekeys::{KyberPreKeyRecord, PreKeyRecord, SignedPreKeyRecord};
use crate::state::record::SessionRecord;
use crate::storage::{
    Direction, IdentityKeyStore, KyberPreKeyStore, PreKeyStore, ProtocolAddress,
    SessionStore, SignedPreKeyStore,
};
use async_trait::async_trait;
use std::collections::HashMap;

/// Identity store с trust-on-first-use
#[derive(Debug, Clone)]
pub struct InMemIdentityKeyStore {
    identity_key_pair: IdentityKeyPair,
    registration_id: u32,
    known_keys: HashMap<ProtocolAddress, IdentityKey>,
}

impl InMemIdentityKeyStore {
    pub fn new(identity_key_pair: IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            identity_key_pair,
            registration_id,
            known_keys: HashMap::new(),
        }
    }
}

#[async_trait(?Send)]
impl IdentityKeyStore for InMemIdentityKeyStore {
    async fn get_identity_key_pair(&self) -> Result<IdentityKeyPair> {
        Ok(self.identity_key_pair.clone())
    }

    async fn get_local_registration_id(&self) -> Result<u32> {
        Ok(self.registration_id)
    }

    async fn save_identity(&mut self, address: &ProtocolAddress, identity: &IdentityKey) -> Result<bool> {
        use tracing::debug;

        match self.known_keys.insert(address.clone(), *identity) {
            Some(previous) if previous != *identity => {
                debug!(target: "storage::memory", address = %address, "Identity key replaced");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        _direction: Direction,
    ) -> Result<bool> {
        Ok(match self.known_keys.get(address) {
            None => true,
            Some(known) => known == identity,
        })
    }

    async fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>> {
        Ok(self.known_keys.get(address).copied())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemPreKeyStore {
    pre_keys: HashMap<u32, PreKeyRecord>,
}

impl InMemPreKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait(?Send)]
impl PreKeyStore for InMemPreKeyStore {
    async fn get_pre_key(&self, pre_key_id: u32) -> Result<PreKeyRecord> {
        self.pre_keys
            .get(&pre_key_id)
            .cloned()
            .ok_or(RatchetError::PreKeyNotFound(pre_key_id))
    }

    async fn save_pre_key(&mut self, pre_key_id: u32, record: &PreKeyRecord) -> Result<()> {
        self.pre_keys.insert(pre_key_id, record.clone());
        Ok(())
    }

    async fn remove_pre_key(&mut self, pre_key_id: u32) -> Result<()> {
        use tracing::debug;

        self.pre_keys
            .remove(&pre_key_id)
            .ok_or(RatchetError::PreKeyNotFound(pre_key_id))?;
        debug!(target: "storage::memory", pre_key_id = pre_key_id, "One-time pre-key removed");
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemSignedPreKeyStore {
    signed_pre_keys: HashMap<u32, SignedPreKeyRecord>,
}

impl InMemSignedPreKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait(?Send)]
impl SignedPreKeyStore for InMemSignedPreKeyStore {
    async fn get_signed_pre_key(&self, signed_pre_key_id: u32) -> Result<SignedPreKeyRecord> {
        self.signed_pre_keys
            .get(&signed_pre_key_id)
            .cloned()
            .ok_or(RatchetError::SignedPreKeyNotFound(signed_pre_key_id))
    }

    async fn save_signed_pre_key(
        &mut self,
        signed_pre_key_id: u32,
        record: &SignedPreKeyRecord,
    ) -> Result<()> {
        self.signed_pre_keys.insert(signed_pre_key_id, record.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemKyberPreKeyStore {
    kyber_pre_keys: HashMap<u32, KyberPreKeyRecord>,
}

impl InMemKyberPreKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait(?Send)]
impl KyberPreKeyStore for InMemKyberPreKeyStore {
    async fn get_kyber_pre_key(&self, kyber_pre_key_id: u32) -> Result<KyberPreKeyRecord> {
        self.kyber_pre_keys
            .get(&kyber_pre_key_id)
            .cloned()
            .ok_or(RatchetError::KyberPreKeyNotFound(kyber_pre_key_id))
    }

    async fn save_kyber_pre_key(
        &mut self,
        kyber_pre_key_id: u32,
        record: &KyberPreKeyRecord,
    ) -> Result<()> {
        self.kyber_pre_keys.insert(kyber_pre_key_id, record.clone());
        Ok(())
    }

    async fn remove_kyber_pre_key(&mut self, kyber_pre_key_id: u32) -> Result<()> {
        use tracing::debug;

        self.kyber_pre_keys
            .remove(&kyber_pre_key_id)
            .ok_or(RatchetError::KyberPreKeyNotFound(kyber_pre_key_id))?;
        debug!(target: "storage::memory", kyber_pre_key_id = kyber_pre_key_id, "Kyber pre-key removed");
        Ok(())
    }
}

/// Сессии хранятся сериализованными: каждый load/store проходит через RecordStructure
#[derive(Debug, Clone, Default)]
pub struct InMemSessionStore {
    sessions: HashMap<ProtocolAddress, Vec<u8>>,
}

impl InMemSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Сырые байты записи (для проверок "состояние не изменилось")
    pub fn raw_session(&self, address: &ProtocolAddress) -> Option<&[u8]> {
        self.sessions.get(address).map(Vec::as_slice)
    }
}

#[async_trait(?Send)]
impl SessionStore for InMemSessionStore {
    async fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>> {
        self.sessions
            .get(address)
            .map(|bytes| SessionRecord::deserialize(bytes))
            .transpose()
    }

    async fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()> {
        self.sessions.insert(address.clone(), record.serialize());
        Ok(())
    }
}

/// Все пять хранилищ одного участника
#[derive(Debug, Clone)]
pub struct InMemProtocolStore {
    pub identity_store: InMemIdentityKeyStore,
    pub pre_key_store: InMemPreKeyStore,
    pub signed_pre_key_store: InMemSignedPreKeyStore,
    pub kyber_pre_key_store: InMemKyberPreKeyStore,
    pub session_store: InMemSessionStore,
}

impl InMemProtocolStore {
    pub fn new(identity_key_pair: IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            identity_store: InMemIdentityKeyStore::new(identity_key_pair, registration_id),
            pre_key_store: InMemPreKeyStore::new(),
            signed_pre_key_store: InMemSignedPreKeyStore::new(),
            kyber_pre_key_store: InMemKyberPreKeyStore::new(),
            session_store: InMemSessionStore::new(),
        }
    }
}
