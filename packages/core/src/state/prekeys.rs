// Записи pre-keys (то, что лежит в PreKeyStore / SignedPreKeyStore / KyberPreKeyStore)

use crate::crypto::keys::{IdentityKeyPair, KemKeyPair, KeyPair};
use crate::crypto::CryptoProvider;
use crate::error::Result;
use crate::utils::time::now_millis;
use rand_core::{CryptoRng, RngCore};

/// Одноразовый EC pre-key
#[derive(Debug, Clone)]
pub struct PreKeyRecord {
    pub id: u32,
    pub key_pair: KeyPair,
}

impl PreKeyRecord {
    pub fn new(id: u32, key_pair: KeyPair) -> Self {
        Self { id, key_pair }
    }

    pub fn generate<P: CryptoProvider, R: RngCore + CryptoRng>(id: u32, rng: &mut R) -> Self {
        Self::new(id, KeyPair::generate::<P, _>(rng))
    }
}

/// Signed pre-key: подпись identity ключом над сериализованным публичным ключом
#[derive(Debug, Clone)]
pub struct SignedPreKeyRecord {
    pub id: u32,
    pub timestamp: u64,
    pub key_pair: KeyPair,
    pub signature: Vec<u8>,
}

impl SignedPreKeyRecord {
    pub fn generate<P: CryptoProvider, R: RngCore + CryptoRng>(
        id: u32,
        identity: &IdentityKeyPair,
        rng: &mut R,
    ) -> Result<Self> {
        let key_pair = KeyPair::generate::<P, _>(rng);
        let signature = identity
            .private_key()
            .calculate_signature::<P, _>(rng, &key_pair.public_key.serialize())?;

        Ok(Self {
            id,
            timestamp: now_millis(),
            key_pair,
            signature: signature.to_vec(),
        })
    }
}

/// Kyber pre-key (в этой реализации используется один раз, как one-time key)
#[derive(Debug, Clone)]
pub struct KyberPreKeyRecord {
    pub id: u32,
    pub timestamp: u64,
    pub key_pair: KemKeyPair,
    pub signature: Vec<u8>,
}

impl KyberPreKeyRecord {
    pub fn generate<P: CryptoProvider, R: RngCore + CryptoRng>(
        id: u32,
        identity: &IdentityKeyPair,
        rng: &mut R,
    ) -> Result<Self> {
        let key_pair = KemKeyPair::generate::<P>()?;
        let signature = identity
            .private_key()
            .calculate_signature::<P, _>(rng, &key_pair.public_key.serialize())?;

        Ok(Self {
            id,
            timestamp: now_millis(),
            key_pair,
            signature: signature.to_vec(),
        })
    }
}
