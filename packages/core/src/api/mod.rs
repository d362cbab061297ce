// Публичный API протокола
//
// Все операции async: приостанавливаются только на I/O stores.
// Stores передаются явно, вызывающий сериализует доступ к одному собеседнику.

pub mod messaging;
pub mod session;

pub use messaging::{
    triple_ratchet_decrypt, triple_ratchet_decrypt_prekey, triple_ratchet_decrypt_signal,
    triple_ratchet_encrypt, triple_ratchet_encrypt_message, triple_ratchet_encrypt_or_establish,
};
pub use session::process_prekey_bundle;
