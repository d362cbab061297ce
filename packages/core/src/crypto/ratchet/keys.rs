use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::crypto::{CryptoProvider, MESSAGE_KEYS_INFO, ROOT_RATCHET_INFO};
use crate::error::CryptoError;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

const MESSAGE_KEY_SEED: u8 = 0x01;
const CHAIN_KEY_SEED: u8 = 0x02;

/// Набор ключей одного сообщения
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MessageKeys {
    cipher_key: [u8; 32],
    mac_key: [u8; 32],
    iv: [u8; 16],
    #[zeroize(skip)]
    counter: u32,
}

impl MessageKeys {
    pub fn new(cipher_key: [u8; 32], mac_key: [u8; 32], iv: [u8; 16], counter: u32) -> Self {
        Self {
            cipher_key,
            mac_key,
            iv,
            counter,
        }
    }

    /// `HKDF(salt = pq_salt, ikm = seed, info = "WhisperMessageKeys", L = 80)`
    pub fn derive_keys<P: CryptoProvider>(
        seed: &[u8],
        pq_salt: Option<&[u8]>,
        counter: u32,
    ) -> Result<Self, CryptoError> {
        let okm = P::hkdf_derive_key(pq_salt, seed, MESSAGE_KEYS_INFO, 80)?;

        let mut cipher_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        let mut iv = [0u8; 16];
        cipher_key.copy_from_slice(&okm[..32]);
        mac_key.copy_from_slice(&okm[32..64]);
        iv.copy_from_slice(&okm[64..80]);

        Ok(Self::new(cipher_key, mac_key, iv, counter))
    }

    pub fn cipher_key(&self) -> &[u8; 32] {
        &self.cipher_key
    }

    pub fn mac_key(&self) -> &[u8; 32] {
        &self.mac_key
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }
}

impl fmt::Debug for MessageKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageKeys")
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

/// Сохранённый skipped message key.
///
/// Старые записи хранят готовые cipher/mac/iv, новые только seed;
/// ключи из seed выводятся лениво, в момент использования (соль зависит от PQ state).
#[derive(Clone, PartialEq, Eq)]
pub enum MessageKeyGenerator {
    Keys(MessageKeys),
    Seed { seed: [u8; 32], counter: u32 },
}

impl MessageKeyGenerator {
    pub fn counter(&self) -> u32 {
        match self {
            Self::Keys(keys) => keys.counter(),
            Self::Seed { counter, .. } => *counter,
        }
    }

    /// Соль применяется только к seed-форме: legacy ключи уже выведены.
    pub fn generate_keys<P: CryptoProvider>(
        self,
        pq_salt: Option<&[u8]>,
    ) -> Result<MessageKeys, CryptoError> {
        match self {
            Self::Keys(keys) => Ok(keys),
            Self::Seed { seed, counter } => MessageKeys::derive_keys::<P>(&seed, pq_salt, counter),
        }
    }
}

impl fmt::Debug for MessageKeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keys(keys) => write!(f, "MessageKeyGenerator::Keys({})", keys.counter()),
            Self::Seed { counter, .. } => write!(f, "MessageKeyGenerator::Seed({})", counter),
        }
    }
}

/// Chain key симметричного ratchet
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ChainKey {
    key: [u8; 32],
    #[zeroize(skip)]
    index: u32,
}

impl ChainKey {
    pub fn new(key: [u8; 32], index: u32) -> Self {
        Self { key, index }
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// `HMAC(ck, 0x02)`, индекс + 1
    pub fn next_chain_key<P: CryptoProvider>(&self) -> Result<Self, CryptoError> {
        Ok(Self {
            key: self.calculate_base_material::<P>(CHAIN_KEY_SEED)?,
            index: self.index + 1,
        })
    }

    /// `HMAC(ck, 0x01)`
    pub fn message_key_seed<P: CryptoProvider>(&self) -> Result<[u8; 32], CryptoError> {
        self.calculate_base_material::<P>(MESSAGE_KEY_SEED)
    }

    pub fn message_key_generator<P: CryptoProvider>(
        &self,
    ) -> Result<MessageKeyGenerator, CryptoError> {
        Ok(MessageKeyGenerator::Seed {
            seed: self.message_key_seed::<P>()?,
            counter: self.index,
        })
    }

    pub fn message_keys<P: CryptoProvider>(
        &self,
        pq_salt: Option<&[u8]>,
    ) -> Result<MessageKeys, CryptoError> {
        MessageKeys::derive_keys::<P>(&self.message_key_seed::<P>()?, pq_salt, self.index)
    }

    fn calculate_base_material<P: CryptoProvider>(&self, seed: u8) -> Result<[u8; 32], CryptoError> {
        P::hmac(&self.key, &[&[seed]])
    }
}

impl fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainKey")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// Root key DH ratchet
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RootKey {
    key: [u8; 32],
}

impl RootKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// DH ratchet step: `HKDF(salt = rootKey, ikm = DH(our, their), info = "WhisperRatchet", L = 64)`
    pub fn create_chain<P: CryptoProvider>(
        &self,
        their_ratchet_key: &PublicKey,
        our_ratchet_key: &PrivateKey,
    ) -> Result<(RootKey, ChainKey), CryptoError> {
        let shared_secret = our_ratchet_key.calculate_agreement::<P>(their_ratchet_key)?;
        self.derive_from_shared_secret::<P>(&shared_secret)
    }

    pub(crate) fn derive_from_shared_secret<P: CryptoProvider>(
        &self,
        shared_secret: &[u8],
    ) -> Result<(RootKey, ChainKey), CryptoError> {
        let okm = P::hkdf_derive_key(Some(&self.key), shared_secret, ROOT_RATCHET_INFO, 64)?;

        let mut root_key = [0u8; 32];
        let mut chain_key = [0u8; 32];
        root_key.copy_from_slice(&okm[..32]);
        chain_key.copy_from_slice(&okm[32..]);

        Ok((RootKey::new(root_key), ChainKey::new(chain_key, 0)))
    }
}

impl fmt::Debug for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootKey([REDACTED])")
    }
}
