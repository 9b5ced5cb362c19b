//! Clocks and time values used by the `aa` registry crates
//!
//! Everything that needs to know "now" takes a [`Clock`], so that the
//! conditional-fetch bookkeeping can be driven deterministically in tests
//! with a [`TestClock`].

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_must_use
)]
#![forbid(unsafe_code)]

use std::{
    fmt,
    ops::{Add, Sub},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use chrono::{DateTime, NaiveDateTime, Utc};

/// Format of an IMF-fixdate, the preferred HTTP-date form (RFC 9110, §5.6.7)
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Obsolete RFC 850 form, e.g. `Sunday, 06-Nov-94 08:49:37 GMT`
const RFC_850_FORMAT: &str = "%A, %d-%b-%y %H:%M:%S GMT";

/// Obsolete ANSI C `asctime()` form, e.g. `Sun Nov  6 08:49:37 1994`
const ASCTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Unix time
///
/// Whole seconds elapsed since 1970-01-01T00:00:00Z. HTTP dates carry
/// second precision, so nothing finer is tracked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct UnixTime(pub u64);

impl UnixTime {
    /// Parses an HTTP-date such as a `Last-Modified` header value
    ///
    /// Accepts the IMF-fixdate form as well as the two obsolete forms
    /// (RFC 850 and `asctime`) that recipients must still understand.
    /// Returns `None` for anything that is not a valid date on or after the
    /// Unix epoch.
    pub fn parse_http_date(value: &str) -> Option<Self> {
        let value = value.trim();
        let secs = DateTime::parse_from_rfc2822(value)
            .map(|dt| dt.timestamp())
            .or_else(|_| {
                NaiveDateTime::parse_from_str(value, RFC_850_FORMAT)
                    .map(|dt| dt.and_utc().timestamp())
            })
            .or_else(|_| {
                NaiveDateTime::parse_from_str(value, ASCTIME_FORMAT)
                    .map(|dt| dt.and_utc().timestamp())
            })
            .ok()?;

        u64::try_from(secs).ok().map(Self)
    }

    /// Formats this time as an HTTP-date, suitable for `If-Modified-Since`
    pub fn to_http_date(self) -> String {
        let secs = i64::try_from(self.0).unwrap_or(i64::MAX);
        match DateTime::<Utc>::from_timestamp(secs, 0) {
            Some(dt) => dt.format(HTTP_DATE_FORMAT).to_string(),
            None => DateTime::<Utc>::MAX_UTC.format(HTTP_DATE_FORMAT).to_string(),
        }
    }

    /// Subtracts a duration, stopping at the epoch
    #[inline]
    pub fn saturating_sub(self, rhs: Duration) -> Self {
        Self(self.0.saturating_sub(rhs.as_secs()))
    }
}

impl From<SystemTime> for UnixTime {
    #[inline]
    fn from(t: SystemTime) -> Self {
        let time = t
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        UnixTime(time)
    }
}

impl Add<Duration> for UnixTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_add(rhs.as_secs()))
    }
}

impl Sub for UnixTime {
    type Output = Duration;

    /// The time elapsed from `rhs` to `self`, zero if `rhs` is later
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Duration::from_secs(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for UnixTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Represents a clock, which can tell the current time
pub trait Clock {
    /// Gets the current time according to this clock
    fn now(&self) -> UnixTime;
}

/// The system clock as provided by `std::time::SystemTime`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct System;

impl Clock for System {
    #[inline]
    fn now(&self) -> UnixTime {
        UnixTime::from(SystemTime::now())
    }
}

/// A manually driven clock
///
/// Clones share the same underlying time, so a test can keep one handle
/// and advance the clock that a component under test holds.
#[derive(Clone, Debug, Default)]
pub struct TestClock(Arc<AtomicU64>);

impl Clock for TestClock {
    #[inline]
    fn now(&self) -> UnixTime {
        UnixTime(self.0.load(Ordering::Acquire))
    }
}

impl TestClock {
    /// Creates a new test clock with the specified time
    pub fn new(time: UnixTime) -> Self {
        Self(Arc::new(AtomicU64::new(time.0)))
    }

    /// Updates the clock's current time to `val`
    pub fn set(&self, val: UnixTime) {
        self.0.store(val.0, Ordering::Release);
    }

    /// Advances the clock by `inc`, truncated to whole seconds
    pub fn advance(&self, inc: Duration) {
        self.0.fetch_add(inc.as_secs(), Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_imf_fixdate() {
        assert_eq!(
            UnixTime(784_111_777).to_http_date(),
            "Sun, 06 Nov 1994 08:49:37 GMT"
        );
    }

    #[test]
    fn parses_imf_fixdate() {
        assert_eq!(
            UnixTime::parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"),
            Some(UnixTime(784_111_777))
        );
    }

    #[test]
    fn parses_obsolete_forms() {
        assert_eq!(
            UnixTime::parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT"),
            Some(UnixTime(784_111_777))
        );
        assert_eq!(
            UnixTime::parse_http_date("Sun Nov  6 08:49:37 1994"),
            Some(UnixTime(784_111_777))
        );
    }

    #[test]
    fn adds_whole_seconds_and_displays_them() {
        let later = UnixTime(784_111_777) + Duration::from_millis(60_999);
        assert_eq!(later, UnixTime(784_111_837));
        assert_eq!(later.to_string(), "784111837");
    }

    #[test]
    fn rejects_garbage_and_pre_epoch_dates() {
        assert_eq!(UnixTime::parse_http_date("yesterday-ish"), None);
        assert_eq!(
            UnixTime::parse_http_date("Wed, 31 Dec 1969 23:59:59 GMT"),
            None
        );
    }

    #[test]
    fn subtraction_saturates() {
        assert_eq!(UnixTime(10) - UnixTime(25), Duration::ZERO);
        assert_eq!(
            UnixTime(10).saturating_sub(Duration::from_secs(60)),
            UnixTime(0)
        );
        assert_eq!(UnixTime(100) - UnixTime(40), Duration::from_secs(60));
    }

    #[test]
    fn test_clock_clones_share_time() {
        let clock = TestClock::new(UnixTime(1_000));
        let held_elsewhere = clock.clone();

        clock.advance(Duration::from_secs(90));
        assert_eq!(held_elsewhere.now(), UnixTime(1_090));

        held_elsewhere.set(UnixTime(5));
        assert_eq!(clock.now(), UnixTime(5));
    }
}
