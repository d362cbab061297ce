use thiserror::Error;

use crate::protocol::codec::CodecError;

/// Ошибки примитивного слоя (CryptoProvider)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Failed to generate keys: {0}")]
    KeyGenerationError(String),
    #[error("Invalid key: {0}")]
    InvalidKeyError(String),
    #[error("Signature verification failed: {0}")]
    SignatureVerificationError(String),
    #[error("KEM encapsulation failed: {0}")]
    KemEncapsulationError(String),
    #[error("KEM decapsulation failed: {0}")]
    KemDecapsulationError(String),
    #[error("AEAD encryption failed: {0}")]
    AeadEncryptionError(String),
    #[error("AEAD decryption failed: {0}")]
    AeadDecryptionError(String),
    #[error("Key derivation failed: {0}")]
    KeyDerivationError(String),
}

impl From<aes_gcm::Error> for CryptoError {
    fn from(err: aes_gcm::Error) -> Self {
        CryptoError::AeadDecryptionError(err.to_string())
    }
}

/// Ошибки протокола
///
/// MAC / duplicate / too-far-future различаются для логов и тестов, но наружу
/// их стоит отдавать одинаково ("cannot decrypt"), см. [`RatchetError::is_decryption_failure`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RatchetError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Message authentication failed")]
    InvalidMac,

    #[error("Untrusted identity for {0}")]
    UntrustedIdentity(String),

    #[error("Pre-key {0} not found")]
    PreKeyNotFound(u32),

    #[error("Signed pre-key {0} not found")]
    SignedPreKeyNotFound(u32),

    #[error("Kyber pre-key {0} not found")]
    KyberPreKeyNotFound(u32),

    #[error("Invalid session state: {0}")]
    InvalidSessionState(String),

    #[error("Duplicate message: chain index {chain_index}, counter {counter}")]
    DuplicateMessage { chain_index: u32, counter: u32 },

    #[error("Message too far in the future: expected {expected}, got counter {counter}")]
    TooFarInFuture { expected: u32, counter: u32 },

    #[error("Signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Cryptography error: {0}")]
    Crypto(CryptoError),

    #[error("Storage error: {0}")]
    Store(String),
}

impl RatchetError {
    /// Ошибка, которую вызывающий код должен показывать как "cannot decrypt"
    /// без уточнения причины (иначе получается decryption oracle).
    pub fn is_decryption_failure(&self) -> bool {
        matches!(
            self,
            RatchetError::InvalidMac
                | RatchetError::DuplicateMessage { .. }
                | RatchetError::TooFarInFuture { .. }
        )
    }
}

impl From<CryptoError> for RatchetError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::SignatureVerificationError(e) => {
                RatchetError::SignatureVerificationFailed(e)
            }
            CryptoError::InvalidKeyError(e) => RatchetError::InvalidKey(e),
            other => RatchetError::Crypto(other),
        }
    }
}

impl From<CodecError> for RatchetError {
    fn from(err: CodecError) -> Self {
        RatchetError::InvalidMessage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RatchetError>;
