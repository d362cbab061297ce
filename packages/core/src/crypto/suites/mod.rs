//! Криптографические наборы (Crypto Suites)
//!
//! Этот модуль содержит реализации CryptoProvider trait.
//!
//! ## Доступные наборы
//!
//! ### PQXDH Suite (текущий)
//! - **DH**: X25519 (ключи сериализуются как `0x05 || u`, 33 байта)
//! - **Signatures**: XEdDSA поверх тех же Curve25519 ключей
//! - **KEM**: Kyber-1024 (тип ключа `0x08`)
//! - **AEAD**: AES-256-GCM с 16-байтовым IV
//! - **KDF / MAC**: HKDF-SHA256 / HMAC-SHA256
//! - **Suite ID**: 4
//!
//! ## Выбор suite
//!
//! ```rust
//! use construct_ratchet::crypto::suites::pqxdh::PqxdhSuiteProvider;
//! use construct_ratchet::crypto::provider::CryptoProvider;
//!
//! type MySuite = PqxdhSuiteProvider;
//!
//! // Генерация KEM ключей
//! let (secret_key, public_key) = MySuite::generate_kem_keys()?;
//! let (ciphertext, shared) = MySuite::kem_encapsulate(&public_key)?;
//! assert_eq!(MySuite::kem_decapsulate(&secret_key, &ciphertext)?, shared);
//! # Ok::<(), construct_ratchet::error::CryptoError>(())
//! ```

pub mod pqxdh;
