// Форматирование для логов
//
// Ключевой материал никогда не попадает в логи целиком: только короткий
// отпечаток публичного ключа.

/// Количество байт, попадающих в отпечаток
const FINGERPRINT_BYTES: usize = 4;

/// Короткий hex-отпечаток (первые 4 байта) для структурных полей `tracing`
pub fn fingerprint(bytes: &[u8]) -> String {
    let len = bytes.len().min(FINGERPRINT_BYTES);
    hex::encode(&bytes[..len])
}
