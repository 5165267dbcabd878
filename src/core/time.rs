//! Wall-clock helpers
//!
//! All persisted timestamps (send time, expiry, delay due-time) are unix
//! milliseconds so that every client process agrees on them.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch for the given instant
pub fn unix_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis().min(i64::MAX as u128) as i64,
        Err(before) => -(before.duration().as_millis().min(i64::MAX as u128) as i64),
    }
}

/// Current time in unix milliseconds
pub fn now_millis() -> i64 {
    unix_millis(SystemTime::now())
}

/// Add a duration to a unix-millisecond timestamp, saturating
pub fn add_millis(timestamp: i64, duration: Duration) -> i64 {
    let delta = duration.as_millis().min(i64::MAX as u128) as i64;
    timestamp.saturating_add(delta)
}

/// Render a unix-millisecond timestamp as RFC 3339 for display
pub fn format_millis(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| timestamp.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_millis_epoch() {
        assert_eq!(unix_millis(UNIX_EPOCH), 0);
        assert_eq!(unix_millis(UNIX_EPOCH + Duration::from_millis(1500)), 1500);
        assert_eq!(unix_millis(UNIX_EPOCH - Duration::from_millis(20)), -20);
    }

    #[test]
    fn test_now_is_monotone_enough() {
        let first = now_millis();
        std::thread::sleep(Duration::from_millis(2));
        assert!(now_millis() >= first);
    }

    #[test]
    fn test_add_millis_saturates() {
        assert_eq!(add_millis(10, Duration::from_millis(5)), 15);
        assert_eq!(add_millis(i64::MAX - 1, Duration::from_secs(10)), i64::MAX);
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "1970-01-01T00:00:00.000Z");
    }
}
