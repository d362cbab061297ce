//! Состояние протокола: сессии, архив сессий, pre-key записи

pub mod prekeys;
pub mod record;
pub mod session;

pub use prekeys::{KyberPreKeyRecord, PreKeyRecord, SignedPreKeyRecord};
pub use record::{SessionLifecycle, SessionRecord};
pub use session::{Chain, PendingKyberPreKey, PendingPreKey, SessionState};
