//! Централизованная конфигурация для Construct Ratchet
//!
//! Все лимиты протокола (DoS защита) определены здесь, чтобы не хардкодить
//! их по всему крейту. Протокольные константы, влияющие на wire format
//! (версии, KDF info строки), лежат в [`crate::crypto`] и не настраиваются.

use std::sync::OnceLock;

/// Глобальная конфигурация (синглтон)
static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

/// Основная структура конфигурации
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    // ============================================
    // SYMMETRIC RATCHET
    // ============================================

    /// Максимальный прыжок счётчика вперёд внутри одной receiver chain
    /// и максимальный размер кэша skipped message keys одной цепочки (MAX_FORWARD_JUMPS)
    pub max_forward_jumps: u32,

    // ============================================
    // SESSION STATE
    // ============================================

    /// Максимальное количество receiver chains в одной сессии.
    /// При переполнении вытесняется самая старая цепочка.
    pub max_receiver_chains: usize,

    /// Максимальное количество архивных сессий в SessionRecord (ARCHIVED_STATES_MAX_LENGTH)
    pub archived_states_max_length: usize,

    /// Сколько секунд неподтверждённая (pending) сессия Alice остаётся пригодной для отправки.
    /// По умолчанию: 30 дней
    pub max_unacknowledged_session_age_secs: i64,
}

impl Config {
    /// Создать конфигурацию с дефолтными значениями
    pub fn default() -> Self {
        Self {
            max_forward_jumps: 25_000,
            max_receiver_chains: 5,
            archived_states_max_length: 40,
            max_unacknowledged_session_age_secs: 30 * 24 * 60 * 60, // 30 days
        }
    }

    /// Создать конфигурацию из переменных окружения
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RATCHET_MAX_FORWARD_JUMPS") {
            if let Ok(parsed) = val.parse() {
                config.max_forward_jumps = parsed;
            }
        }

        if let Ok(val) = std::env::var("RATCHET_MAX_RECEIVER_CHAINS") {
            if let Ok(parsed) = val.parse() {
                config.max_receiver_chains = parsed;
            }
        }

        if let Ok(val) = std::env::var("RATCHET_ARCHIVED_STATES_MAX_LENGTH") {
            if let Ok(parsed) = val.parse() {
                config.archived_states_max_length = parsed;
            }
        }

        if let Ok(val) = std::env::var("RATCHET_MAX_UNACKNOWLEDGED_SESSION_AGE_SECS") {
            if let Ok(parsed) = val.parse() {
                config.max_unacknowledged_session_age_secs = parsed;
            }
        }

        config
    }

    /// Получить глобальный экземпляр конфигурации
    ///
    /// Автоматически инициализирует конфигурацию со значениями по умолчанию при первом вызове
    pub fn global() -> &'static Config {
        GLOBAL_CONFIG.get_or_init(Config::default)
    }

    /// Инициализировать глобальную конфигурацию со значениями по умолчанию
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init() -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(Self::default())
            .map_err(|_| "Config already initialized")
    }

    /// Инициализировать глобальную конфигурацию из переменных окружения
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init_from_env() -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(Self::from_env())
            .map_err(|_| "Config already initialized")
    }

    /// Инициализировать глобальную конфигурацию с кастомным экземпляром
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init_with(config: Config) -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(config)
            .map_err(|_| "Config already initialized")
    }

    /// Проверить, инициализирована ли глобальная конфигурация
    pub fn is_initialized() -> bool {
        GLOBAL_CONFIG.get().is_some()
    }
}
