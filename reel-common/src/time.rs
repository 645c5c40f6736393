//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Whole seconds between two timestamps, clamped to zero when `end`
/// precedes `start` (ingest clock skew produces occasional inversions).
pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    end.signed_duration_since(start).num_seconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // Should be a reasonable timestamp (after year 2000)
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
    }

    #[test]
    fn test_seconds_between_normal() {
        let start = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 10, 12, 30, 0).unwrap();
        assert_eq!(seconds_between(start, end), 1800);
    }

    #[test]
    fn test_seconds_between_inverted_clamps_to_zero() {
        let start = Utc.with_ymd_and_hms(2026, 1, 10, 12, 30, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
        assert_eq!(seconds_between(start, end), 0);
    }

    #[test]
    fn test_seconds_between_identical() {
        let t = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
        assert_eq!(seconds_between(t, t), 0);
    }
}
