//! SessionRecord: текущая сессия + архив предыдущих
//!
//! ## State machine
//!
//! ```text
//!            promote_state(new)
//!   Fresh ─────────────────────► Pending ──(первый ответ собеседника)──► Established
//!     ▲                             │                                         │
//!     │                             └──────── promote_state(new) ◄────────────┘
//!     │                                       (текущая → previous_sessions[0])
//!   new_fresh()
//! ```
//!
//! - `previous_sessions` хранятся новыми первыми, не больше `archived_states_max_length`
//! - `promote_matching_session` находит сессию по (version, alice base key) и делает её текущей:
//!   так обрабатываются simultaneous initiate и повторные PreKeySignalMessage

use crate::config::Config;
use crate::crypto::keys::PublicKey;
use crate::error::{RatchetError, Result};
use crate::protocol::structure::{RecordStructure, SessionStructure};
use crate::state::session::{normalize_base_key, SessionState};

/// Фаза жизненного цикла записи
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifecycle {
    /// Нет текущей сессии
    Fresh,
    /// Текущая сессия ждёт подтверждения (есть pending pre-key)
    Pending,
    /// Текущая сессия подтверждена
    Established,
}

#[derive(Debug, Clone, Default)]
pub struct SessionRecord {
    current_session: Option<SessionState>,
    previous_sessions: Vec<SessionState>,
}

impl SessionRecord {
    pub fn new_fresh() -> Self {
        Self::default()
    }

    pub fn new(state: SessionState) -> Self {
        Self {
            current_session: Some(state),
            previous_sessions: Vec::new(),
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let record = RecordStructure::decode(bytes)?;

        let current_session = record
            .current_session
            .as_ref()
            .map(SessionState::from_structure)
            .transpose()?;
        let previous_sessions = record
            .previous_sessions
            .iter()
            .map(|bytes| SessionState::from_structure(&SessionStructure::decode(bytes)?))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            current_session,
            previous_sessions,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        RecordStructure {
            current_session: self.current_session.as_ref().map(SessionState::to_structure),
            previous_sessions: self
                .previous_sessions
                .iter()
                .map(SessionState::serialize)
                .collect(),
        }
        .encode()
    }

    pub fn session_state(&self) -> Option<&SessionState> {
        self.current_session.as_ref()
    }

    pub fn session_state_mut(&mut self) -> Option<&mut SessionState> {
        self.current_session.as_mut()
    }

    /// Архивные сессии, новые первыми
    pub fn previous_session_states(&self) -> impl ExactSizeIterator<Item = &SessionState> {
        self.previous_sessions.iter()
    }

    pub fn lifecycle(&self) -> SessionLifecycle {
        match &self.current_session {
            None => SessionLifecycle::Fresh,
            Some(state) if state.pending_pre_key().is_some() => SessionLifecycle::Pending,
            Some(_) => SessionLifecycle::Established,
        }
    }

    pub fn has_usable_sender_chain(&self, now_ms: u64) -> bool {
        self.current_session
            .as_ref()
            .map(|state| state.has_usable_sender_chain(now_ms))
            .unwrap_or(false)
    }

    /// Текущая сессия отправляет с этим ratchet key
    pub fn current_ratchet_key_matches(&self, key: &PublicKey) -> bool {
        self.current_session
            .as_ref()
            .and_then(|state| state.sender_ratchet_key().ok())
            .map(|ours| ours == *key)
            .unwrap_or(false)
    }

    fn current(&self) -> Result<&SessionState> {
        self.current_session
            .as_ref()
            .ok_or_else(|| RatchetError::InvalidSessionState("no current session".into()))
    }

    pub fn session_version(&self) -> Result<u32> {
        Ok(self.current()?.session_version())
    }

    pub fn local_registration_id(&self) -> Result<u32> {
        Ok(self.current()?.local_registration_id())
    }

    pub fn remote_registration_id(&self) -> Result<u32> {
        Ok(self.current()?.remote_registration_id())
    }

    /// Есть ли (текущая или архивная) сессия с таким base key
    pub fn has_session_state(&self, version: u32, alice_base_key: &[u8]) -> bool {
        let base_key = normalize_base_key(alice_base_key);
        self.current_session
            .iter()
            .chain(self.previous_sessions.iter())
            .any(|state| state.session_version() == version && state.alice_base_key_matches(&base_key))
    }

    /// Найти сессию по (version, base key) и сделать её текущей.
    ///
    /// Возвращает `true`, если сессия найдена (текущая остаётся на месте,
    /// архивная поднимается в current).
    pub fn promote_matching_session(&mut self, version: u32, alice_base_key: &[u8]) -> bool {
        use tracing::debug;

        let base_key = normalize_base_key(alice_base_key);
        let matches = |state: &SessionState| {
            state.session_version() == version && state.alice_base_key_matches(&base_key)
        };

        if self.current_session.as_ref().map(matches).unwrap_or(false) {
            return true;
        }

        match self.previous_sessions.iter().position(matches) {
            Some(index) => {
                debug!(
                    target: "crypto::record",
                    index = index,
                    "Promoting matching archived session"
                );
                let state = self.previous_sessions.remove(index);
                self.promote_state(state);
                true
            }
            None => false,
        }
    }

    /// Переместить текущую сессию в архив
    pub fn archive_current_state(&mut self) {
        use tracing::debug;

        let Some(mut current) = self.current_session.take() else {
            debug!(target: "crypto::record", "Skipping archive, current session state is fresh");
            return;
        };

        current.clear_unacknowledged_pre_key_message();
        self.previous_sessions.insert(0, current);

        let max_archived = Config::global().archived_states_max_length;
        if self.previous_sessions.len() > max_archived {
            self.previous_sessions.truncate(max_archived);
            debug!(
                target: "crypto::record",
                max = max_archived,
                "Dropped oldest archived session"
            );
        }
    }

    /// Архивировать текущую сессию и установить новую
    pub fn promote_state(&mut self, new_state: SessionState) {
        self.archive_current_state();
        self.current_session = Some(new_state);
    }

    /// Заменить текущую сессию без архивации (после успешного encrypt/decrypt)
    pub fn set_session_state(&mut self, state: SessionState) {
        self.current_session = Some(state);
    }

    /// Поднять архивную сессию `index`, заменив её обновлённым состоянием
    pub(crate) fn promote_old_session(&mut self, index: usize, updated_state: SessionState) -> Result<()> {
        if index >= self.previous_sessions.len() {
            return Err(RatchetError::InvalidSessionState(format!(
                "no archived session at index {}",
                index
            )));
        }
        self.previous_sessions.remove(index);
        self.promote_state(updated_state);
        Ok(())
    }
}
