use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;

const BASE36_DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SESSION_SUFFIX_LENGTH: usize = 11;

/// Lowercase base36 rendering of an unsigned integer
pub fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// `len` random base36 characters
pub fn random_base36(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE36_DIGITS[rng.gen_range(0..BASE36_DIGITS.len())] as char)
        .collect()
}

/// Time-based prefix plus random suffix. The suffix carries ~56 bits, so two
/// browsers opening a chat in the same millisecond still get distinct ids.
pub fn generate_session_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    format!("{}{}", to_base36(millis), random_base36(SESSION_SUFFIX_LENGTH))
}

/// Fixed-width RFC 3339 in UTC with millisecond precision. Lexicographic order
/// of the output matches chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_to_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_700_000_000_000), "loyw3v28");
    }

    #[test]
    fn test_random_base36_charset() {
        let s = random_base36(64);
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_session_ids_are_distinct() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_ne!(a, b);
        assert!(a.len() > SESSION_SUFFIX_LENGTH);
    }

    #[test]
    fn test_format_timestamp_is_fixed_width() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_timestamp(&ts), "2026-01-02T03:04:05.000Z");
    }
}
