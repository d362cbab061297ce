//! Криптографический модуль
//!
//! # Архитектура
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Application                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 api (process / encrypt / decrypt)           │
//! │  - Загружает и сохраняет SessionRecord через stores         │
//! │  - Trial decryption по текущей и архивным сессиям            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                ┌─────────────┴─────────────┐
//!                ▼                           ▼
//! ┌───────────────────────────┐  ┌──────────────────────────┐
//! │   handshake (PQXDH)       │  │  ratchet                 │
//! │  - 3-4 DH + Kyber-1024    │  │  - RootKey (DH ratchet)  │
//! │  - rootKey / chainKey /   │  │  - ChainKey (HMAC)       │
//! │    pqRootKey              │  │  - MessageKeys (HKDF)    │
//! └───────────────────────────┘  └──────────────────────────┘
//!                │                           │
//!                └─────────────┬─────────────┘
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              CryptoProvider (Crypto-Agility)                │
//! │  - DH (X25519), Signatures (XEdDSA)                         │
//! │  - KEM (Kyber-1024)                                         │
//! │  - AEAD (AES-256-GCM)                                       │
//! │  - KDF / MAC (HKDF-SHA256 / HMAC-SHA256)                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Модули
//!
//! - [`provider`]: CryptoProvider trait для crypto-agility
//! - [`suites`]: Реализации CryptoProvider (PQXDH)
//! - [`keys`]: Типизированные DH / identity / KEM ключи
//! - [`ratchet`]: RootKey, ChainKey, MessageKeys
//! - [`handshake`]: PQXDH, первый SessionState для Alice и Bob

/// CryptoProvider trait для crypto-agility
pub mod provider;

/// Криптографические наборы
pub mod suites;

pub mod keys;

/// Симметричный и DH ratchet
pub mod ratchet;

/// PQXDH key agreement
pub mod handshake;

// ============================================================================
// Re-exports для удобства
// ============================================================================

pub use provider::CryptoProvider;

pub type SuiteID = u16;

/// Suite ID for X25519 + Kyber-1024 (PQXDH)
pub const PQXDH_SUITE_ID: SuiteID = 4;

// ============================================================================
// Протокольные константы (влияют на wire format, не настраиваются)
// ============================================================================

/// Текущая версия (младший полубайт version byte)
pub const CIPHERTEXT_MESSAGE_CURRENT_VERSION: u8 = 4;

/// Версия SignalMessage (старший полубайт: 0x34)
pub const SIGNAL_MESSAGE_VERSION: u8 = 3;

/// Версия PreKeySignalMessage (старший полубайт: 0x44)
pub const PREKEY_MESSAGE_VERSION: u8 = 4;

/// Версия сессии, созданной PQXDH
pub const PQXDH_SESSION_VERSION: u32 = 4;

/// Длина усечённого HMAC-SHA256 после тела SignalMessage
pub const MAC_LENGTH: usize = 8;

pub const MESSAGE_KEYS_INFO: &[u8] = b"WhisperMessageKeys";
pub const ROOT_RATCHET_INFO: &[u8] = b"WhisperRatchet";
pub const PQXDH_INFO: &[u8] = b"WhisperText_X25519_SHA-256_CRYSTALS-KYBER-1024";
