use std::time::{SystemTime, UNIX_EPOCH};

/// Stable 32-bit string hash rendered in base 36.
///
/// Folds UTF-16 code units as `h = h * 31 + c` with 32-bit wraparound and
/// keeps the magnitude, so keys written by earlier sessions stay addressable.
pub fn hash_key(value: &str) -> String {
    let mut hash: i32 = 0;
    for unit in value.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(unit as i32);
    }
    to_base36((hash as i64).unsigned_abs())
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Truncates to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_base36() {
        assert_eq!(hash_key(""), "0");
        // 'a' = 97 = 2p in base 36
        assert_eq!(hash_key("a"), "2p");
        // "ab" = 97 * 31 + 98 = 3105
        assert_eq!(hash_key("ab"), "2e9");
        assert_eq!(hash_key("https://example.com/book/1"), hash_key("https://example.com/book/1"));
        assert_ne!(hash_key("book-1"), hash_key("book-2"));
    }

    #[test]
    fn hash_handles_overflow() {
        let long = "第一章".repeat(500);
        let key = hash_key(&long);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("第一章 开始", 3), "第一章");
        assert_eq!(truncate_chars("short", 50), "short");
    }
}
