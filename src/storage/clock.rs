//! Expiration Clock
//!
//! Expirations are stored as absolute instants in 100 ns ticks since the Unix
//! epoch, carried in a record's extra-metadata field. `0` means the record
//! never expires.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const TICKS_PER_MILLISECOND: i64 = 10_000;
pub const TICKS_PER_SECOND: i64 = 1_000 * TICKS_PER_MILLISECOND;

/// Extra-metadata value for "no expiration".
pub const NO_EXPIRATION: i64 = 0;

/// Resolution of a relative or absolute time argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
}

impl TimeUnit {
    #[inline]
    pub fn ticks_per_unit(self) -> i64 {
        match self {
            TimeUnit::Seconds => TICKS_PER_SECOND,
            TimeUnit::Milliseconds => TICKS_PER_MILLISECOND,
        }
    }
}

/// Current time in ticks.
#[inline]
pub fn now_ticks() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_to_ticks)
        .unwrap_or(0)
}

/// Absolute instant `ttl` from now.
#[inline]
pub fn ticks_from_now(ttl: Duration) -> i64 {
    now_ticks().saturating_add(duration_to_ticks(ttl))
}

#[inline]
pub fn duration_to_ticks(d: Duration) -> i64 {
    i64::try_from(d.as_nanos() / 100).unwrap_or(i64::MAX)
}

/// Converts a Unix timestamp expressed in `unit` into ticks.
#[inline]
pub fn unix_to_ticks(timestamp: i64, unit: TimeUnit) -> i64 {
    timestamp.saturating_mul(unit.ticks_per_unit())
}

/// Converts an absolute instant into a Unix timestamp in `unit`, truncating.
#[inline]
pub fn ticks_to_unix(ticks: i64, unit: TimeUnit) -> i64 {
    ticks / unit.ticks_per_unit()
}

/// Remaining time until `expire_at` in `unit`, truncating, never negative.
#[inline]
pub fn remaining(expire_at: i64, now: i64, unit: TimeUnit) -> i64 {
    (expire_at - now).max(0) / unit.ticks_per_unit()
}

/// Whether an extra-metadata value denotes an instant at or before `now`.
#[inline]
pub fn is_expired(expire_at: i64, now: i64) -> bool {
    expire_at != NO_EXPIRATION && expire_at <= now
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversions() {
        assert_eq!(unix_to_ticks(2, TimeUnit::Seconds), 2 * TICKS_PER_SECOND);
        assert_eq!(unix_to_ticks(5, TimeUnit::Milliseconds), 50_000);
        assert_eq!(ticks_to_unix(25_000, TimeUnit::Milliseconds), 2);
        assert_eq!(ticks_to_unix(TICKS_PER_SECOND * 3 + 1, TimeUnit::Seconds), 3);
    }

    #[test]
    fn test_remaining_truncates_and_clamps() {
        let now = 1_000 * TICKS_PER_SECOND;
        let at = now + 9_999 * TICKS_PER_MILLISECOND;
        assert_eq!(remaining(at, now, TimeUnit::Seconds), 9);
        assert_eq!(remaining(at, now, TimeUnit::Milliseconds), 9_999);
        assert_eq!(remaining(now - 1, now, TimeUnit::Seconds), 0);
    }

    #[test]
    fn test_is_expired() {
        let now = now_ticks();
        assert!(!is_expired(NO_EXPIRATION, now));
        assert!(is_expired(now, now));
        assert!(!is_expired(ticks_from_now(Duration::from_secs(60)), now));
    }

    #[test]
    fn test_now_is_after_epoch() {
        assert!(now_ticks() > 0);
        assert!(ticks_from_now(Duration::from_millis(10)) > now_ticks() - TICKS_PER_SECOND);
    }
}
