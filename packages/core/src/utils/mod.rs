//! Вспомогательные функции: время и форматирование для логов

pub mod logging;
pub mod time;
