use crate::crypto::provider::CryptoProvider;
use crate::crypto::{SuiteID, PQXDH_SUITE_ID};
use crate::error::CryptoError;
use aes_gcm::{
    aead::{consts::U16, Aead, KeyInit, Payload},
    aes::Aes256,
    AesGcm, Nonce,
};
use curve25519_dalek::{
    edwards::EdwardsPoint,
    montgomery::MontgomeryPoint,
    scalar::{clamp_integer, Scalar},
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use pqcrypto_kyber::kyber1024;
use pqcrypto_traits::kem::{Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _};
use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// AES-256-GCM с 16-байтовым nonce (IV из MessageKeys используется целиком)
type Aes256Gcm16 = AesGcm<Aes256, U16>;

type HmacSha256 = Hmac<Sha256>;

/// Concrete implementation of `CryptoProvider` for the PQXDH suite.
pub struct PqxdhSuiteProvider;

fn hash_to_scalar(hasher: Sha512) -> Scalar {
    let mut wide = [0u8; 64];
    wide.copy_from_slice(hasher.finalize().as_slice());
    Scalar::from_bytes_mod_order_wide(&wide)
}

impl CryptoProvider for PqxdhSuiteProvider {
    fn generate_dh_private_key<R: RngCore + CryptoRng>(rng: &mut R) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        clamp_integer(bytes)
    }

    fn dh_public_key(private_key: &[u8; 32]) -> [u8; 32] {
        let secret = StaticSecret::from(*private_key);
        X25519PublicKey::from(&secret).to_bytes()
    }

    fn calculate_agreement(
        private_key: &[u8; 32],
        public_key: &[u8; 32],
    ) -> Result<[u8; 32], CryptoError> {
        let secret = StaticSecret::from(*private_key);
        let shared = secret.diffie_hellman(&X25519PublicKey::from(*public_key));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidKeyError(
                "Non-contributory DH agreement (low-order public key)".to_string(),
            ));
        }
        Ok(shared.to_bytes())
    }

    // XEdDSA: подпись Ed25519-совместимой схемой ключом X25519.
    // Знаковый бит Edwards-ключа переносится в старший бит s.
    fn calculate_signature<R: RngCore + CryptoRng>(
        rng: &mut R,
        private_key: &[u8; 32],
        message: &[u8],
    ) -> Result<[u8; 64], CryptoError> {
        let mut random_bytes = [0u8; 64];
        rng.fill_bytes(&mut random_bytes);

        let key_data = clamp_integer(*private_key);
        let a = Scalar::from_bytes_mod_order(key_data);
        let ed_public_key = EdwardsPoint::mul_base(&a).compress();
        let sign_bit = ed_public_key.as_bytes()[31] & 0b1000_0000;

        let mut hash_prefix = [0xFFu8; 32];
        hash_prefix[0] = 0xFE;

        let mut nonce_hasher = Sha512::new();
        nonce_hasher.update(hash_prefix);
        nonce_hasher.update(key_data);
        nonce_hasher.update(message);
        nonce_hasher.update(random_bytes);
        let r = hash_to_scalar(nonce_hasher);
        let cap_r = EdwardsPoint::mul_base(&r).compress();

        let mut hasher = Sha512::new();
        hasher.update(cap_r.as_bytes());
        hasher.update(ed_public_key.as_bytes());
        hasher.update(message);
        let h = hash_to_scalar(hasher);
        let s = h * a + r;

        let mut signature = [0u8; 64];
        signature[..32].copy_from_slice(cap_r.as_bytes());
        signature[32..].copy_from_slice(s.as_bytes());
        signature[63] &= 0b0111_1111;
        signature[63] |= sign_bit;
        Ok(signature)
    }

    fn verify_signature(
        public_key: &[u8; 32],
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        let signature: &[u8; 64] = signature.try_into().map_err(|_| {
            CryptoError::SignatureVerificationError(format!(
                "Invalid signature length: {}",
                signature.len()
            ))
        })?;

        let ed_point = MontgomeryPoint(*public_key)
            .to_edwards((signature[63] & 0b1000_0000) >> 7)
            .ok_or_else(|| {
                CryptoError::SignatureVerificationError("Public key is not on the curve".to_string())
            })?;
        let ed_public_key = ed_point.compress();

        let mut cap_r = [0u8; 32];
        cap_r.copy_from_slice(&signature[..32]);
        let mut s_bytes = [0u8; 32];
        s_bytes.copy_from_slice(&signature[32..]);
        s_bytes[31] &= 0b0111_1111;
        if (s_bytes[31] & 0b1110_0000) != 0 {
            return Err(CryptoError::SignatureVerificationError(
                "Non-canonical signature scalar".to_string(),
            ));
        }

        let mut hasher = Sha512::new();
        hasher.update(cap_r);
        hasher.update(ed_public_key.as_bytes());
        hasher.update(message);
        let h = hash_to_scalar(hasher);

        let check = EdwardsPoint::vartime_double_scalar_mul_basepoint(
            &h,
            &(-ed_point),
            &Scalar::from_bytes_mod_order(s_bytes),
        )
        .compress();

        if bool::from(check.as_bytes().ct_eq(&cap_r)) {
            Ok(())
        } else {
            Err(CryptoError::SignatureVerificationError(
                "Signature does not match".to_string(),
            ))
        }
    }

    fn generate_kem_keys() -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let (public_key, secret_key) = kyber1024::keypair();
        Ok((secret_key.as_bytes().to_vec(), public_key.as_bytes().to_vec()))
    }

    fn kem_encapsulate(public_key: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let public_key = kyber1024::PublicKey::from_bytes(public_key).map_err(|e| {
            CryptoError::KemEncapsulationError(format!("Invalid Kyber public key: {}", e))
        })?;
        let (shared_secret, ciphertext) = kyber1024::encapsulate(&public_key);
        Ok((
            ciphertext.as_bytes().to_vec(),
            shared_secret.as_bytes().to_vec(),
        ))
    }

    fn kem_decapsulate(secret_key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let secret_key = kyber1024::SecretKey::from_bytes(secret_key).map_err(|e| {
            CryptoError::KemDecapsulationError(format!("Invalid Kyber secret key: {}", e))
        })?;
        let ciphertext = kyber1024::Ciphertext::from_bytes(ciphertext).map_err(|e| {
            CryptoError::KemDecapsulationError(format!("Invalid Kyber ciphertext: {}", e))
        })?;
        let shared_secret = kyber1024::decapsulate(&ciphertext, &secret_key);
        Ok(shared_secret.as_bytes().to_vec())
    }

    fn hkdf_derive_key(
        salt: Option<&[u8]>,
        ikm: &[u8],
        info: &[u8],
        len: usize,
    ) -> Result<Vec<u8>, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(salt, ikm);
        let mut okm = vec![0u8; len];
        hkdf.expand(info, &mut okm)
            .map_err(|e| CryptoError::KeyDerivationError(e.to_string()))?;
        Ok(okm)
    }

    fn hmac(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], CryptoError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|e| CryptoError::KeyDerivationError(e.to_string()))?;
        for part in parts {
            mac.update(part);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    fn aead_encrypt(
        key: &[u8; 32],
        iv: &[u8; 16],
        plaintext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm16::new_from_slice(key)
            .map_err(|e| CryptoError::AeadEncryptionError(e.to_string()))?;
        let payload = Payload {
            msg: plaintext,
            aad: associated_data.unwrap_or(b""),
        };

        cipher
            .encrypt(Nonce::<U16>::from_slice(iv), payload)
            .map_err(|e| CryptoError::AeadEncryptionError(e.to_string()))
    }

    fn aead_decrypt(
        key: &[u8; 32],
        iv: &[u8; 16],
        ciphertext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm16::new_from_slice(key)
            .map_err(|e| CryptoError::AeadDecryptionError(e.to_string()))?;
        let payload = Payload {
            msg: ciphertext,
            aad: associated_data.unwrap_or(b""),
        };

        Ok(cipher.decrypt(Nonce::<U16>::from_slice(iv), payload)?)
    }

    fn suite_id() -> SuiteID {
        PQXDH_SUITE_ID
    }
}
