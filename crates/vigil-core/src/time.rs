//! Time windows and bucket arithmetic.
//!
//! Collection windows are half-open: `[start, end)`. Time-series buckets are
//! aligned by flooring a timestamp to a multiple of the bucket width counted
//! from the Unix epoch.

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a window, rejecting `end < start`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the end precedes the start.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(Error::InvalidInput(format!(
                "window end {end} precedes start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Creates a window of `length` beginning at `start`.
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>, length: Duration) -> Self {
        Self {
            start,
            end: start + length,
        }
    }

    /// Returns the window length.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Returns true if `ts` falls inside the window.
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Returns true if the two windows share any instant.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Floors `ts` to the start of its bucket of `width`.
///
/// Widths that are zero or negative leave the timestamp unchanged.
#[must_use]
pub fn floor_to_bucket(ts: DateTime<Utc>, width: Duration) -> DateTime<Utc> {
    let width_ms = width.num_milliseconds();
    if width_ms <= 0 {
        return ts;
    }
    let ms = ts.timestamp_millis();
    let floored = ms - ms.rem_euclid(width_ms);
    DateTime::from_timestamp_millis(floored).unwrap_or(ts)
}

/// Floors `ts` to the whole minute.
#[must_use]
pub fn floor_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::minutes(1)).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn window_is_half_open() {
        let w = TimeWindow::new(at(10, 0, 0), at(10, 5, 0)).unwrap();
        assert!(w.contains(at(10, 0, 0)));
        assert!(w.contains(at(10, 4, 59)));
        assert!(!w.contains(at(10, 5, 0)));
        assert_eq!(w.duration(), Duration::minutes(5));
    }

    #[test]
    fn window_rejects_inverted_bounds() {
        assert!(TimeWindow::new(at(10, 5, 0), at(10, 0, 0)).is_err());
    }

    #[test]
    fn adjacent_windows_do_not_overlap() {
        let a = TimeWindow::starting_at(at(10, 0, 0), Duration::minutes(5));
        let b = TimeWindow::starting_at(at(10, 5, 0), Duration::minutes(5));
        assert!(!a.overlaps(&b));
        let c = TimeWindow::starting_at(at(10, 4, 0), Duration::minutes(5));
        assert!(a.overlaps(&c));
    }

    #[test]
    fn floor_to_bucket_aligns_to_width() {
        assert_eq!(
            floor_to_bucket(at(10, 7, 31), Duration::minutes(5)),
            at(10, 5, 0)
        );
        assert_eq!(
            floor_to_bucket(at(10, 5, 0), Duration::minutes(5)),
            at(10, 5, 0)
        );
    }

    #[test]
    fn floor_to_minute_drops_seconds() {
        assert_eq!(floor_to_minute(at(10, 7, 31)), at(10, 7, 0));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn bucket_floor_is_aligned_and_not_after_input(
                secs in 0i64..4_000_000_000,
                width_mins in 1i64..120,
            ) {
                let ts = DateTime::from_timestamp(secs, 0).unwrap();
                let width = Duration::minutes(width_mins);
                let floored = floor_to_bucket(ts, width);
                prop_assert!(floored <= ts);
                prop_assert!(ts - floored < width);
                prop_assert_eq!(floored.timestamp_millis() % width.num_milliseconds(), 0);
                prop_assert_eq!(floor_to_bucket(floored, width), floored);
            }
        }
    }
}
