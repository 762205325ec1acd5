//! Time-of-day arithmetic for the daily pump schedule.
//!
//! All schedule times are second offsets into a UTC day (`0..86400`). Any
//! local-time adjustment is applied once, when the configuration is loaded.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds in one UTC day.
pub const SECONDS_PER_DAY: u32 = 86_400;

/// Microseconds in one second.
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Hour/minute/second triple as written in configuration files.
///
/// Fields are signed and unbounded on purpose: `{hour: -1}` or `{minute: 62}`
/// are legal and normalised by [`safe_hms_to_second_of_utc_day`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hms {
    /// Hour of day.
    pub hour: i32,
    /// Minute of hour.
    pub minute: i32,
    /// Second of minute.
    pub second: i32,
}

impl Hms {
    /// Create a new triple.
    #[must_use]
    pub const fn new(hour: i32, minute: i32, second: i32) -> Self {
        Self {
            hour,
            minute,
            second,
        }
    }

    /// Second of the UTC day after shifting the hour by `-utc_offset_hours`.
    #[must_use]
    pub fn to_second_of_utc_day(self, utc_offset_hours: i32) -> u32 {
        safe_hms_to_second_of_utc_day(
            i64::from(self.hour) - i64::from(utc_offset_hours),
            i64::from(self.minute),
            i64::from(self.second),
        )
    }
}

/// Converts hour, minute and second to seconds since the start of the UTC day.
///
/// Negative and overflowing components carry into the next larger unit and the
/// total wraps around the day, so `(-1, 0, 0)` is `23:00:00`, `(0, 62, 0)` is
/// `01:02:00` and `(24, 0, 0)` is midnight.
#[must_use]
pub fn safe_hms_to_second_of_utc_day(h: i64, m: i64, s: i64) -> u32 {
    let total = h
        .wrapping_mul(3600)
        .wrapping_add(m.wrapping_mul(60))
        .wrapping_add(s);
    // rem_euclid keeps the result in 0..86400, which always fits in u32.
    total.rem_euclid(i64::from(SECONDS_PER_DAY)) as u32
}

/// One active window of the daily schedule.
///
/// `start_sec <= end_sec` is a same-day window; `start_sec > end_sec` crosses
/// midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleInterval {
    /// Window start, seconds into the UTC day.
    pub start_sec: u32,
    /// Window end (exclusive), seconds into the UTC day.
    pub end_sec: u32,
}

impl ScheduleInterval {
    /// Create an interval from two already-normalised day offsets.
    #[must_use]
    pub const fn new(start_sec: u32, end_sec: u32) -> Self {
        Self { start_sec, end_sec }
    }

    /// Returns true if the window wraps past midnight.
    #[must_use]
    pub const fn crosses_midnight(&self) -> bool {
        self.start_sec > self.end_sec
    }
}

impl fmt::Display for ScheduleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            SecondOfDay(self.start_sec),
            SecondOfDay(self.end_sec)
        )
    }
}

/// `HH:MM:SS` formatting helper for a second of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecondOfDay(pub u32);

impl fmt::Display for SecondOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0 % SECONDS_PER_DAY;
        write!(f, "{:02}:{:02}:{:02}", s / 3600, (s / 60) % 60, s % 60)
    }
}

/// UTC time of day for an absolute time in microseconds since the epoch.
#[must_use]
pub fn time_of_day_from_epoch_micros(epoch_us: i64) -> u32 {
    let secs = epoch_us.div_euclid(MICROS_PER_SECOND);
    match DateTime::<Utc>::from_timestamp(secs, 0) {
        Some(dt) => dt.hour() * 3600 + dt.minute() * 60 + dt.second(),
        // Out of chrono's calendar range; the day still has 86400 seconds.
        None => secs.rem_euclid(i64::from(SECONDS_PER_DAY)) as u32,
    }
}

/// Human-readable UTC calendar time with microsecond precision.
#[must_use]
pub fn format_epoch_micros(epoch_us: i64) -> String {
    let secs = epoch_us.div_euclid(MICROS_PER_SECOND);
    let micros = epoch_us.rem_euclid(MICROS_PER_SECOND) as u32;
    match DateTime::<Utc>::from_timestamp(secs, micros * 1000) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        None => format!("{epoch_us}us"),
    }
}
