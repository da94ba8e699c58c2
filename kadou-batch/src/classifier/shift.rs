//! Shift and availability rules
//!
//! Pure functions over extracted text fragments and a capture time.
//! Times are compared in minutes of the day; a fragment time has zero
//! seconds, so an availability time equal to the capture minute only
//! counts when the capture happened exactly on the minute.

use chrono::{NaiveDateTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;

const MINUTES_PER_DAY: u32 = 24 * 60;

static SHIFT_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,2}):(\d{2})[\s～〜\-~]+(\d{1,2}):(\d{2})")
        .expect("static shift range pattern is valid")
});

static CLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2}):(\d{2})").expect("static clock pattern is valid"));

/// Keywords that override time parsing
#[derive(Debug, Clone)]
pub struct KeywordRules {
    /// Any of these in a shift fragment means the worker is off today
    pub rest: Vec<String>,
    /// Anywhere in the availability text, means fully booked
    pub fully_booked: String,
}

impl Default for KeywordRules {
    fn default() -> Self {
        Self {
            rest: ["お休み", "出勤調整中", "次回", "出勤予定", "調整中", "OFF", "お疲れ様"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fully_booked: "受付終了".to_string(),
        }
    }
}

impl KeywordRules {
    pub fn is_rest(&self, text: &str) -> bool {
        self.rest.iter().any(|k| text.contains(k.as_str()))
    }

    pub fn is_fully_booked(&self, text: &str) -> bool {
        !self.fully_booked.is_empty() && text.contains(self.fully_booked.as_str())
    }
}

/// Declared shift, in minutes of the day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftRange {
    pub start: u32,
    pub end: u32,
}

impl ShiftRange {
    /// Inclusive on both ends; `start > end` wraps past midnight
    pub fn contains(&self, minute_of_day: u32) -> bool {
        if self.start <= self.end {
            self.start <= minute_of_day && minute_of_day <= self.end
        } else {
            minute_of_day >= self.start || minute_of_day <= self.end
        }
    }
}

fn to_minutes(hour: &str, minute: &str) -> Option<u32> {
    let h: u32 = hour.parse().ok()?;
    let m: u32 = minute.parse().ok()?;
    if m >= 60 {
        return None;
    }
    Some(h * 60 + m)
}

/// First `H:MM ~ H:MM` range in `text`
///
/// Times written past 24:00 (`18:00～26:00`) are folded onto the clock.
pub fn parse_shift_range(text: &str) -> Option<ShiftRange> {
    let caps = SHIFT_RANGE.captures(text)?;
    let start = to_minutes(&caps[1], &caps[2])? % MINUTES_PER_DAY;
    let end = to_minutes(&caps[3], &caps[4])? % MINUTES_PER_DAY;
    Some(ShiftRange { start, end })
}

fn minute_of_day(ts: NaiveDateTime) -> u32 {
    ts.hour() * 60 + ts.minute()
}

/// On-shift decision over a block's shift fragments
///
/// Fragments are checked in order: a rest keyword ends the check as off
/// shift, a range containing the capture minute ends it as on shift.
pub fn is_on_shift(fragments: &[String], captured_at: NaiveDateTime, rules: &KeywordRules) -> bool {
    let now = minute_of_day(captured_at);
    for fragment in fragments {
        if rules.is_rest(fragment) {
            return false;
        }
        if let Some(range) = parse_shift_range(fragment) {
            if range.contains(now) {
                return true;
            }
        }
    }
    false
}

/// True if any `H:MM` in `text` is at or after the capture time
fn has_time_at_or_after(text: &str, captured_at: NaiveDateTime) -> bool {
    let now_secs = captured_at.num_seconds_from_midnight();
    CLOCK.captures_iter(text).any(|caps| {
        match to_minutes(&caps[1], &caps[2]) {
            Some(minutes) if minutes < MINUTES_PER_DAY => minutes * 60 >= now_secs,
            _ => false,
        }
    })
}

/// Working decision for a block
///
/// Only on-shift workers can be working. A fully-booked marker anywhere
/// in the availability text means working; otherwise a next-available
/// time at or after the capture time means working.
pub fn is_working(
    on_shift: bool,
    availability_text: &str,
    next_available: &[String],
    captured_at: NaiveDateTime,
    rules: &KeywordRules,
) -> bool {
    if !on_shift {
        return false;
    }
    if rules.is_fully_booked(availability_text) {
        return true;
    }
    next_available
        .iter()
        .any(|fragment| has_time_at_or_after(fragment, captured_at))
}
