//! Site-local clock and operating-hours arithmetic
//!
//! All capture timestamps are naive date-times on the venue site's clock
//! (JST by default), truncated to whole seconds. Operating hours are
//! times of day that may run past midnight: `26:00` means 02:00 on the
//! following calendar day.

use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use crate::{Error, Result};

/// Storage format for capture timestamps (compares correctly as text)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Storage format for business dates
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Format a capture timestamp for storage
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored capture timestamp
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map_err(|e| Error::InvalidInput(format!("Invalid timestamp '{}': {}", s, e)))
}

/// Format a business date for storage
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a business date (`YYYY-MM-DD`)
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|e| Error::InvalidInput(format!("Invalid date '{}': {}", s, e)))
}

/// Drop sub-second precision
pub fn truncate_to_seconds(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Clock of the site being observed
///
/// Every "now" the batch reads goes through one of these so that
/// capture timestamps, operating-hours gating and the aggregation date
/// all agree on a single fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteClock {
    offset: FixedOffset,
}

impl SiteClock {
    /// Build a clock from a UTC offset in minutes (540 = JST)
    pub fn from_offset_minutes(minutes: i32) -> Result<Self> {
        let offset = FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
            Error::Config(format!("Invalid timezone offset: {} minutes", minutes))
        })?;
        Ok(Self { offset })
    }

    /// Japan Standard Time (UTC+9)
    pub fn jst() -> Self {
        Self {
            offset: FixedOffset::east_opt(9 * 3600).expect("static JST offset is in range"),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Current site-local time, whole seconds
    pub fn now(&self) -> NaiveDateTime {
        self.to_local(Utc::now())
    }

    /// Current site-local date
    pub fn today(&self) -> NaiveDate {
        self.now().date()
    }

    /// Convert a UTC instant to site-local time, whole seconds
    pub fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        truncate_to_seconds(instant.with_timezone(&self.offset).naive_local())
    }

    /// Convert a file system timestamp (e.g. a held page's mtime)
    pub fn from_system_time(&self, time: SystemTime) -> NaiveDateTime {
        self.to_local(DateTime::<Utc>::from(time))
    }
}

impl Default for SiteClock {
    fn default() -> Self {
        Self::jst()
    }
}

/// Time of day on a business day, allowed to run past midnight
///
/// Valid range is `00:00` to `47:59`. Values of 24:00 and above denote
/// the following calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime {
    minutes: u32,
}

impl ClockTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if minute >= 60 || hour >= 48 {
            return Err(Error::InvalidInput(format!(
                "Time out of range: {}:{:02}",
                hour, minute
            )));
        }
        Ok(Self {
            minutes: hour * 60 + minute,
        })
    }

    /// Minutes since the start of the business day
    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    pub fn hour(&self) -> u32 {
        self.minutes / 60
    }

    pub fn minute(&self) -> u32 {
        self.minutes % 60
    }

    /// True for `24:00` and later
    pub fn is_next_day(&self) -> bool {
        self.minutes >= MINUTES_PER_DAY
    }

    /// Same instant folded onto a 24-hour clock
    pub fn wall_time(&self) -> NaiveTime {
        let folded = self.minutes % MINUTES_PER_DAY;
        NaiveTime::from_hms_opt(folded / 60, folded % 60, 0).unwrap_or(NaiveTime::MIN)
    }

    fn offset(&self) -> Duration {
        Duration::minutes(i64::from(self.minutes))
    }
}

impl FromStr for ClockTime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let (h, m) = trimmed
            .split_once(':')
            .ok_or_else(|| Error::InvalidInput(format!("Expected HH:MM, got '{}'", s)))?;
        let hour = h
            .parse::<u32>()
            .map_err(|_| Error::InvalidInput(format!("Invalid hour in '{}'", s)))?;
        let minute = m
            .parse::<u32>()
            .map_err(|_| Error::InvalidInput(format!("Invalid minute in '{}'", s)))?;
        Self::new(hour, minute)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Inclusive span of site-local time `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl OperatingWindow {
    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Widen both edges by `buffer`
    pub fn widened(&self, buffer: Duration) -> Self {
        Self {
            start: self.start - buffer,
            end: self.end + buffer,
        }
    }
}

/// A venue's daily opening and closing times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHours {
    pub open: ClockTime,
    pub close: ClockTime,
}

impl OperatingHours {
    /// Opening must be on the business day itself; closing may run past midnight
    pub fn new(open: ClockTime, close: ClockTime) -> Result<Self> {
        if open.is_next_day() {
            return Err(Error::InvalidInput(format!(
                "Opening time must be before 24:00, got {}",
                open
            )));
        }
        Ok(Self { open, close })
    }

    /// True when closing falls on the next calendar day
    ///
    /// Either closing is written past 24:00, or it is not after opening
    /// (`20:00`-`02:00`, and `10:00`-`10:00` for round-the-clock venues).
    pub fn spans_midnight(&self) -> bool {
        self.close.is_next_day() || self.close <= self.open
    }

    /// Window for the business day `date`
    pub fn window(&self, date: NaiveDate) -> OperatingWindow {
        let midnight = date.and_time(NaiveTime::MIN);
        let start = midnight + self.open.offset();
        let end = if self.close.is_next_day() {
            midnight + self.close.offset()
        } else if self.close <= self.open {
            midnight + Duration::days(1) + self.close.offset()
        } else {
            midnight + self.close.offset()
        };
        OperatingWindow { start, end }
    }

    /// Whether `now` is inside today's or yesterday's window, widened by `buffer`
    ///
    /// Yesterday's window matters for overnight venues: at 01:00 the
    /// venue is still serving the previous business day.
    pub fn is_open_at(&self, now: NaiveDateTime, buffer: Duration) -> bool {
        let today = now.date();
        let candidates = [Some(today), today.pred_opt()];
        candidates
            .into_iter()
            .flatten()
            .any(|date| self.window(date).widened(buffer).contains(now))
    }
}

impl fmt::Display for OperatingHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.open, self.close)
    }
}
