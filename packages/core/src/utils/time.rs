// Время

use chrono::Utc;

/// Текущее время в миллисекундах с начала эпохи (timestamp PendingPreKey)
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Возраст метки времени в секундах относительно `now_ms`; будущие метки дают 0
pub fn age_secs(timestamp_ms: u64, now_ms: u64) -> i64 {
    (now_ms.saturating_sub(timestamp_ms) / 1000) as i64
}
