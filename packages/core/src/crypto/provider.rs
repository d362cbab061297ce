//! Defines the CryptoProvider trait for crypto-agility.
//!
//! Protocol code (ratchet, handshake, session API) never touches a primitive
//! crate directly; everything goes through a suite implementing this trait.

use crate::crypto::SuiteID;
use crate::error::CryptoError;
use rand_core::{CryptoRng, RngCore};

/// Trait that formalizes all cryptographic operations for a specific cipher suite.
///
/// Keys cross this seam as raw bytes: 32-byte Montgomery `u` coordinates for
/// DH/signature keys, suite-defined encodings for KEM keys. Typed wrappers live
/// in [`crate::crypto::keys`].
pub trait CryptoProvider: Send + Sync + 'static {
    /// Generates a new (clamped) DH private key.
    fn generate_dh_private_key<R: RngCore + CryptoRng>(rng: &mut R) -> [u8; 32];

    /// Derives the DH public key for a private key.
    fn dh_public_key(private_key: &[u8; 32]) -> [u8; 32];

    /// Computes a DH shared secret. Low-order (non-contributory) results are rejected.
    fn calculate_agreement(
        private_key: &[u8; 32],
        public_key: &[u8; 32],
    ) -> Result<[u8; 32], CryptoError>;

    /// Signs a message with a DH private key (XEdDSA-style).
    fn calculate_signature<R: RngCore + CryptoRng>(
        rng: &mut R,
        private_key: &[u8; 32],
        message: &[u8],
    ) -> Result<[u8; 64], CryptoError>;

    /// Verifies a signature made by [`CryptoProvider::calculate_signature`].
    fn verify_signature(
        public_key: &[u8; 32],
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError>;

    /// Generates a new KEM key pair. Returns `(secret_key, public_key)`.
    fn generate_kem_keys() -> Result<(Vec<u8>, Vec<u8>), CryptoError>;

    /// Encapsulates a shared secret to the recipient's KEM public key.
    /// Returns the encapsulated ciphertext and the shared secret.
    fn kem_encapsulate(public_key: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError>;

    /// Decapsulates a shared secret using the recipient's KEM secret key.
    fn kem_decapsulate(secret_key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Derives `len` bytes with HKDF. `None` salt means the all-zero salt of RFC 5869.
    fn hkdf_derive_key(
        salt: Option<&[u8]>,
        ikm: &[u8],
        info: &[u8],
        len: usize,
    ) -> Result<Vec<u8>, CryptoError>;

    /// HMAC over the concatenation of `parts`.
    fn hmac(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], CryptoError>;

    /// Performs AEAD encryption with a per-message key and IV.
    fn aead_encrypt(
        key: &[u8; 32],
        iv: &[u8; 16],
        plaintext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Performs AEAD decryption.
    fn aead_decrypt(
        key: &[u8; 32],
        iv: &[u8; 16],
        ciphertext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Returns the SuiteID associated with this CryptoProvider.
    fn suite_id() -> SuiteID;
}
