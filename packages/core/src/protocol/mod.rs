//! Wire protocol
//!
//! - [`codec`]: protobuf примитивы
//! - [`wire`]: тела SignalMessage / PreKeySignalMessage
//! - [`messages`]: version byte, MAC, закрытый набор типов сообщений
//! - [`structure`]: формат хранения SessionRecord
//! - [`bundle`]: PreKeyBundle

pub mod bundle;
pub mod codec;
pub mod messages;
pub mod structure;
pub mod wire;

pub use bundle::PreKeyBundle;
pub use messages::{CiphertextMessage, CiphertextMessageType, PreKeySignalMessage, SignalMessage};
