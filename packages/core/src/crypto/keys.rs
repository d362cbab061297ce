// Типизированные ключи
// DH / identity ключи (Curve25519) и KEM ключи (Kyber-1024) с сериализацией и type-byte префиксами

use crate::crypto::CryptoProvider;
use crate::error::CryptoError;
use crate::utils::logging::fingerprint;
use rand_core::{CryptoRng, RngCore};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Тип ключа Curve25519 (первый байт сериализованного публичного ключа)
pub const DJB_TYPE: u8 = 0x05;
/// Тип ключа Kyber-1024
pub const KYBER_1024_TYPE: u8 = 0x08;

/// Длина сериализованного DH публичного ключа (`0x05 || u`)
pub const SERIALIZED_PUBLIC_KEY_LENGTH: usize = 33;

// ============================================================================
// Curve25519
// ============================================================================

/// Публичный ключ Curve25519
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_djb_public_key_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Разобрать сериализованный ключ (`0x05 || u`, 33 байта)
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        match bytes.split_first() {
            Some((&DJB_TYPE, rest)) => {
                let key: [u8; 32] = rest.try_into().map_err(|_| {
                    CryptoError::InvalidKeyError(format!(
                        "Invalid public key length: {}",
                        bytes.len()
                    ))
                })?;
                Ok(Self(key))
            }
            Some((key_type, _)) => Err(CryptoError::InvalidKeyError(format!(
                "Unknown public key type: 0x{:02x}",
                key_type
            ))),
            None => Err(CryptoError::InvalidKeyError("Empty public key".to_string())),
        }
    }

    pub fn serialize(&self) -> [u8; SERIALIZED_PUBLIC_KEY_LENGTH] {
        let mut out = [0u8; SERIALIZED_PUBLIC_KEY_LENGTH];
        out[0] = DJB_TYPE;
        out[1..].copy_from_slice(&self.0);
        out
    }

    pub fn public_key_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn verify_signature<P: CryptoProvider>(
        &self,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        P::verify_signature(&self.0, message, signature)
    }

    /// Короткий отпечаток для логов
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }

    /// Сравнение с сериализованной формой за константное время
    pub fn ct_eq_serialized(&self, other: &[u8]) -> bool {
        other.len() == SERIALIZED_PUBLIC_KEY_LENGTH && bool::from(self.serialize().ct_eq(other))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

/// Приватный ключ Curve25519 (обнуляется при drop)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyError(format!("Invalid private key length: {}", bytes.len()))
        })?;
        Ok(Self(key))
    }

    pub fn serialize(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn public_key<P: CryptoProvider>(&self) -> PublicKey {
        PublicKey(P::dh_public_key(&self.0))
    }

    pub fn calculate_agreement<P: CryptoProvider>(
        &self,
        their_key: &PublicKey,
    ) -> Result<[u8; 32], CryptoError> {
        P::calculate_agreement(&self.0, &their_key.0)
    }

    pub fn calculate_signature<P: CryptoProvider, R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        message: &[u8],
    ) -> Result<[u8; 64], CryptoError> {
        P::calculate_signature(rng, &self.0, message)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

/// Пара ключей Curve25519 (ratchet / pre-key / ephemeral)
#[derive(Clone, Debug)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl KeyPair {
    pub fn new(public_key: PublicKey, private_key: PrivateKey) -> Self {
        Self {
            public_key,
            private_key,
        }
    }

    pub fn generate<P: CryptoProvider, R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_private_key::<P>(PrivateKey(P::generate_dh_private_key(rng)))
    }

    pub fn from_private_key<P: CryptoProvider>(private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key::<P>();
        Self {
            public_key,
            private_key,
        }
    }

    pub fn calculate_agreement<P: CryptoProvider>(
        &self,
        their_key: &PublicKey,
    ) -> Result<[u8; 32], CryptoError> {
        self.private_key.calculate_agreement::<P>(their_key)
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Долговременный identity ключ
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct IdentityKey(PublicKey);

impl IdentityKey {
    pub fn new(public_key: PublicKey) -> Self {
        Self(public_key)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.0
    }

    pub fn serialize(&self) -> [u8; SERIALIZED_PUBLIC_KEY_LENGTH] {
        self.0.serialize()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        PublicKey::deserialize(bytes).map(Self)
    }
}

impl From<PublicKey> for IdentityKey {
    fn from(key: PublicKey) -> Self {
        Self(key)
    }
}

/// Identity пара ключей: подписывает pre-keys и участвует в PQXDH
#[derive(Clone, Debug)]
pub struct IdentityKeyPair {
    identity_key: IdentityKey,
    private_key: PrivateKey,
}

impl IdentityKeyPair {
    pub fn new(identity_key: IdentityKey, private_key: PrivateKey) -> Self {
        Self {
            identity_key,
            private_key,
        }
    }

    pub fn generate<P: CryptoProvider, R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let key_pair = KeyPair::generate::<P, _>(rng);
        Self {
            identity_key: IdentityKey(key_pair.public_key),
            private_key: key_pair.private_key,
        }
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    pub fn public_key(&self) -> &PublicKey {
        self.identity_key.public_key()
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }
}

impl From<IdentityKeyPair> for KeyPair {
    fn from(pair: IdentityKeyPair) -> Self {
        KeyPair::new(pair.identity_key.0, pair.private_key.clone())
    }
}

// ============================================================================
// KEM (Kyber-1024)
// ============================================================================

fn strip_kem_type(bytes: &[u8], what: &str) -> Result<Vec<u8>, CryptoError> {
    match bytes.split_first() {
        Some((&KYBER_1024_TYPE, rest)) if !rest.is_empty() => Ok(rest.to_vec()),
        Some((key_type, _)) => Err(CryptoError::InvalidKeyError(format!(
            "Invalid {} type: 0x{:02x}",
            what, key_type
        ))),
        None => Err(CryptoError::InvalidKeyError(format!("Empty {}", what))),
    }
}

fn with_kem_type(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + 1);
    out.push(KYBER_1024_TYPE);
    out.extend_from_slice(raw);
    out
}

/// Публичный KEM ключ
#[derive(Clone, PartialEq, Eq)]
pub struct KemPublicKey(Vec<u8>);

impl KemPublicKey {
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        strip_kem_type(bytes, "KEM public key").map(Self)
    }

    pub fn serialize(&self) -> Vec<u8> {
        with_kem_type(&self.0)
    }

    /// Возвращает `(serialized_ciphertext, shared_secret)`
    pub fn encapsulate<P: CryptoProvider>(&self) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let (ciphertext, shared_secret) = P::kem_encapsulate(&self.0)?;
        Ok((with_kem_type(&ciphertext), shared_secret))
    }
}

impl fmt::Debug for KemPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KemPublicKey({}, {} bytes)", fingerprint(&self.0), self.0.len())
    }
}

/// Секретный KEM ключ (обнуляется при drop)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KemSecretKey(Vec<u8>);

impl KemSecretKey {
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        strip_kem_type(bytes, "KEM secret key").map(Self)
    }

    pub fn serialize(&self) -> Vec<u8> {
        with_kem_type(&self.0)
    }

    pub fn decapsulate<P: CryptoProvider>(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let raw = strip_kem_type(ciphertext, "KEM ciphertext")?;
        P::kem_decapsulate(&self.0, &raw)
    }
}

impl fmt::Debug for KemSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KemSecretKey([REDACTED])")
    }
}

/// Пара KEM ключей
#[derive(Clone, Debug)]
pub struct KemKeyPair {
    pub public_key: KemPublicKey,
    pub secret_key: KemSecretKey,
}

impl KemKeyPair {
    pub fn generate<P: CryptoProvider>() -> Result<Self, CryptoError> {
        let (secret_key, public_key) = P::generate_kem_keys()?;
        Ok(Self {
            public_key: KemPublicKey(public_key),
            secret_key: KemSecretKey(secret_key),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::suites::pqxdh::PqxdhSuiteProvider;
    use rand::rngs::OsRng;

    type P = PqxdhSuiteProvider;

    #[test]
    fn test_public_key_serialization() {
        let pair = KeyPair::generate::<P, _>(&mut OsRng);
        let serialized = pair.public_key.serialize();
        assert_eq!(serialized[0], DJB_TYPE);
        assert_eq!(serialized.len(), 33);
        assert_eq!(PublicKey::deserialize(&serialized).unwrap(), pair.public_key);
        assert!(pair.public_key.ct_eq_serialized(&serialized));
    }

    #[test]
    fn test_public_key_rejects_bad_type_and_length() {
        let mut bytes = [0x42u8; 33];
        assert!(PublicKey::deserialize(&bytes).is_err());
        bytes[0] = DJB_TYPE;
        assert!(PublicKey::deserialize(&bytes[..20]).is_err());
        assert!(PublicKey::deserialize(&[]).is_err());
    }

    #[test]
    fn test_private_key_debug_is_redacted() {
        let pair = KeyPair::generate::<P, _>(&mut OsRng);
        assert_eq!(format!("{:?}", pair.private_key), "PrivateKey([REDACTED])");
    }

    #[test]
    fn test_identity_signs_prekey() {
        let identity = IdentityKeyPair::generate::<P, _>(&mut OsRng);
        let pre_key = KeyPair::generate::<P, _>(&mut OsRng);
        let message = pre_key.public_key.serialize();

        let signature = identity
            .private_key()
            .calculate_signature::<P, _>(&mut OsRng, &message)
            .unwrap();
        assert!(identity
            .public_key()
            .verify_signature::<P>(&message, &signature)
            .is_ok());
    }

    #[test]
    fn test_kem_roundtrip_with_type_byte() {
        let pair = KemKeyPair::generate::<P>().unwrap();
        let serialized = pair.public_key.serialize();
        assert_eq!(serialized[0], KYBER_1024_TYPE);

        let public = KemPublicKey::deserialize(&serialized).unwrap();
        let (ciphertext, shared) = public.encapsulate::<P>().unwrap();
        assert_eq!(ciphertext[0], KYBER_1024_TYPE);
        assert_eq!(pair.secret_key.decapsulate::<P>(&ciphertext).unwrap(), shared);
    }
}
