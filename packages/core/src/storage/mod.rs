// Хранилища протокола
//
// Ядро не владеет данными: identity, pre-keys и сессии приходят снаружи
// через async traits. Вызывающий сам сериализует доступ к одной паре
// (local, remote), внутренних блокировок нет.

pub mod memory;

use crate::crypto::keys::{IdentityKey, IdentityKeyPair};
use crate::error::Result;
use crate::state::prekeys::{KyberPreKeyRecord, PreKeyRecord, SignedPreKeyRecord};
use crate::state::record::SessionRecord;
use async_trait::async_trait;
use std::fmt;

pub use memory::{
    InMemIdentityKeyStore, InMemKyberPreKeyStore, InMemPreKeyStore, InMemProtocolStore,
    InMemSessionStore, InMemSignedPreKeyStore,
};

/// Адрес собеседника: имя + устройство
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolAddress {
    name: String,
    device_id: u32,
}

impl ProtocolAddress {
    pub fn new(name: impl Into<String>, device_id: u32) -> Self {
        Self {
            name: name.into(),
            device_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }
}

impl fmt::Display for ProtocolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}

/// Направление, в котором проверяется доверие к identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sending,
    Receiving,
}

#[async_trait(?Send)]
pub trait IdentityKeyStore {
    async fn get_identity_key_pair(&self) -> Result<IdentityKeyPair>;

    async fn get_local_registration_id(&self) -> Result<u32>;

    /// Сохранить identity собеседника; `true`, если ключ заменил другой
    async fn save_identity(&mut self, address: &ProtocolAddress, identity: &IdentityKey) -> Result<bool>;

    async fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        direction: Direction,
    ) -> Result<bool>;

    async fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>>;
}

#[async_trait(?Send)]
pub trait PreKeyStore {
    async fn get_pre_key(&self, pre_key_id: u32) -> Result<PreKeyRecord>;

    async fn save_pre_key(&mut self, pre_key_id: u32, record: &PreKeyRecord) -> Result<()>;

    /// Удалить ключ; повторное удаление — `PreKeyNotFound`
    async fn remove_pre_key(&mut self, pre_key_id: u32) -> Result<()>;
}

#[async_trait(?Send)]
pub trait SignedPreKeyStore {
    async fn get_signed_pre_key(&self, signed_pre_key_id: u32) -> Result<SignedPreKeyRecord>;

    async fn save_signed_pre_key(
        &mut self,
        signed_pre_key_id: u32,
        record: &SignedPreKeyRecord,
    ) -> Result<()>;
}

#[async_trait(?Send)]
pub trait KyberPreKeyStore {
    async fn get_kyber_pre_key(&self, kyber_pre_key_id: u32) -> Result<KyberPreKeyRecord>;

    async fn save_kyber_pre_key(
        &mut self,
        kyber_pre_key_id: u32,
        record: &KyberPreKeyRecord,
    ) -> Result<()>;

    /// Удалить ключ; повторное удаление — `KyberPreKeyNotFound`
    async fn remove_kyber_pre_key(&mut self, kyber_pre_key_id: u32) -> Result<()>;
}

#[async_trait(?Send)]
pub trait SessionStore {
    async fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>>;

    async fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()>;
}
