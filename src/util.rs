//! Shared helpers
//!
//! Content hashing, `CREATED` timestamps and fixed-point number text.

use chrono::{DateTime, Local};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Timestamp in the `CREATED` keyword style (`Mon Oct 19 14:03:22 2026`)
pub fn created_string(ts: DateTime<Local>) -> String {
    ts.format("%a %b %d %H:%M:%S %Y").to_string()
}

pub fn now_created_string() -> String {
    created_string(Local::now())
}

/// Render a float with a fixed number of decimals, without a negative zero
pub fn format_fixed(value: f64, decimals: usize) -> String {
    let text = format!("{:.*}", decimals, value);
    if text.starts_with('-') && text[1..].chars().all(|c| c == '0' || c == '.') {
        text[1..].to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_created_string_format() {
        let ts = Local.with_ymd_and_hms(2026, 10, 19, 14, 3, 22).unwrap();
        assert_eq!(created_string(ts), "Mon Oct 19 14:03:22 2026");
    }

    #[test]
    fn test_format_fixed_drops_negative_zero() {
        assert_eq!(format_fixed(-0.0000000001, 6), "0.000000");
        assert_eq!(format_fixed(-1.5, 2), "-1.50");
        assert_eq!(format_fixed(1.0, 3), "1.000");
    }
}
