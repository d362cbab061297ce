//! Key Agreement (PQXDH)
//!
//! Гибридный handshake: 3-4 X25519 DH + Kyber-1024 KEM. Результат — первый
//! `SessionState` для каждой из сторон.
//!
//! ## Dataflow
//! ```text
//! Alice (инициатор)                          Bob (получатель)
//! ==================                         =================
//!
//! 1. Получает PreKeyBundle, проверяет подписи
//! 2. Генерирует EK_A, encapsulate(KYBER_B)
//! 3. initialize_alice_session()
//!    → SessionState + kyber ciphertext
//! 4. Первое сообщение уходит как PreKeySignalMessage
//!    (EK_A, ids, kyber ciphertext)  ────────►
//!                                            1. Загружает SPK_B / OPK_B / KYBER_B по ids
//!                                            2. initialize_bob_session()
//!                                               → тот же rootKey / chainKey / pqRootKey
//! ```
//!
//! Проверка подписей bundle и работа со stores — в `api::session`;
//! здесь только математика.

mod pqxdh;

pub use pqxdh::{
    initialize_alice_session, initialize_bob_session, AliceParameters, AliceSession,
    BobParameters,
};
