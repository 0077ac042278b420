//! Time source abstraction and FCB timestamp formatting.
//!
//! This module provides a `TimeSource` trait that abstracts over the clock,
//! allowing the system to use real system time in production and a fixed
//! time in tests.
//!
//! FCB creation times are stored as 14 ASCII characters in UTC:
//! `dd/Mon/yy:HHam`, e.g. `05/Mar/24:14PM`.

use std::time::{SystemTime, UNIX_EPOCH};

/// Width of a formatted timestamp.
pub const TIMESTAMP_WIDTH: usize = 14;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

const MS_PER_HOUR: u64 = 3_600_000;
const HOURS_PER_DAY: u64 = 24;

/// Abstraction over time operations.
pub trait TimeSource {
    /// Get the current time in milliseconds since Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Real time source using system clock.
///
/// This is the default implementation used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    #[allow(clippy::cast_possible_truncation)] // Milliseconds won't overflow u64 for billions of years
    fn now_ms(&self) -> u64 {
        // A clock before 1970 reads as the epoch.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    }
}

/// Time source that always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource(pub u64);

impl TimeSource for FixedTimeSource {
    fn now_ms(&self) -> u64 {
        self.0
    }
}

/// Format a Unix time in milliseconds as an FCB timestamp.
#[must_use]
pub fn format_timestamp(ms: u64) -> String {
    let total_hours = ms / MS_PER_HOUR;
    let hour = total_hours % HOURS_PER_DAY;
    let (year, month, day) = civil_from_days(total_hours / HOURS_PER_DAY);
    let meridiem = if hour < 12 { "AM" } else { "PM" };
    let month_name = MONTHS[usize::try_from(month - 1).unwrap_or(0) % MONTHS.len()];
    format!(
        "{day:02}/{month_name}/{:02}:{hour:02}{meridiem}",
        year % 100
    )
}

/// Convert days since 1970-01-01 to a (year, month, day) civil date.
fn civil_from_days(days: u64) -> (u64, u64, u64) {
    // Shift the epoch to 0000-03-01 so leap days fall at the end of a year.
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + u64::from(month <= 2);
    (year, month, day)
}
