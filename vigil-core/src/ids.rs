//! Identifier and timestamp helpers.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

/// Random 16-byte identifier rendered as 32 hex characters.
pub fn generate_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

/// Current UTC time truncated to millisecond resolution, so timestamps
/// survive the JSON round trip bit-identically.
pub fn now_utc_ms() -> DateTime<Utc> {
    truncate_ms(Utc::now())
}

pub fn truncate_ms(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::milliseconds(1)).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_shape() {
        let id = generate_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_now_is_ms_truncated() {
        let ts = now_utc_ms();
        assert_eq!(ts.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
