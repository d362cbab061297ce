//! Symmetric + DH Ratchet
//!
//! ## Ключевая иерархия
//!
//! ```text
//! RootKey ──create_chain(DH)──► RootKey' + ChainKey(index 0)
//!                                            │
//!                 ┌──────────── HMAC(ck, 0x02) ┴ HMAC(ck, 0x01) ─────────┐
//!                 ▼                                                      ▼
//!          ChainKey(index + 1)                             message key seed
//!                                                                  │
//!                                  HKDF(seed, pqSalt, "WhisperMessageKeys", 80)
//!                                                                  ▼
//!                                             cipher_key(32) ‖ mac_key(32) ‖ iv(16)
//! ```
//!
//! `pqSalt` берётся из PQ ratchet state сессии (см. [`pq_message_salt`]).

mod keys;

pub use keys::{ChainKey, MessageKeyGenerator, MessageKeys, RootKey};

use crate::crypto::keys::PublicKey;
use crate::crypto::CryptoProvider;
use crate::error::CryptoError;

/// Соль для MessageKeys: `HMAC(pqRootKey, senderRatchetKey(33) ‖ counter_be32)`.
///
/// Пустой `pq_root_key` (старые записи без PQ состояния) означает "без соли".
pub fn pq_message_salt<P: CryptoProvider>(
    pq_root_key: &[u8],
    sender_ratchet_key: &PublicKey,
    counter: u32,
) -> Result<Option<[u8; 32]>, CryptoError> {
    if pq_root_key.is_empty() {
        return Ok(None);
    }
    let salt = P::hmac(
        pq_root_key,
        &[&sender_ratchet_key.serialize(), &counter.to_be_bytes()],
    )?;
    Ok(Some(salt))
}
