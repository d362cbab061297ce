// Construct Ratchet
// Triple Ratchet (PQXDH + Double Ratchet) для end-to-end шифрования

#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

// Модули
pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod state;
pub mod storage;
pub mod utils;

// Re-exports для удобства
pub use api::{
    process_prekey_bundle, triple_ratchet_decrypt, triple_ratchet_decrypt_prekey,
    triple_ratchet_decrypt_signal, triple_ratchet_encrypt, triple_ratchet_encrypt_message,
    triple_ratchet_encrypt_or_establish,
};
pub use crypto::keys::{IdentityKey, IdentityKeyPair, KeyPair, PrivateKey, PublicKey};
pub use crypto::suites::pqxdh::PqxdhSuiteProvider;
pub use crypto::CryptoProvider;
pub use error::{CryptoError, RatchetError, Result};
pub use protocol::{CiphertextMessage, CiphertextMessageType, PreKeyBundle, PreKeySignalMessage, SignalMessage};
pub use state::{KyberPreKeyRecord, PreKeyRecord, SessionRecord, SessionState, SignedPreKeyRecord};
pub use storage::{
    Direction, IdentityKeyStore, InMemProtocolStore, KyberPreKeyStore, PreKeyStore, ProtocolAddress,
    SessionStore, SignedPreKeyStore,
};
