//! Domain models shared by the batch and its repositories

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::time::{ClockTime, OperatingHours};
use crate::{Error, Result};

/// Venue category
///
/// Only `RoomBased` venues have a structural limit on simultaneously
/// working staff (one per room), so only they get a capacity ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VenueCategory {
    RoomBased,
    Dispatch,
    #[default]
    Other,
}

impl VenueCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueCategory::RoomBased => "room_based",
            VenueCategory::Dispatch => "dispatch",
            VenueCategory::Other => "other",
        }
    }

    /// Lenient mapping for stored values; anything unknown is `Other`
    pub fn from_stored(s: &str) -> Self {
        match s.trim() {
            "room_based" => VenueCategory::RoomBased,
            "dispatch" => VenueCategory::Dispatch,
            _ => VenueCategory::Other,
        }
    }

    pub fn has_capacity_ceiling(&self) -> bool {
        matches!(self, VenueCategory::RoomBased)
    }
}

impl FromStr for VenueCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "room_based" => Ok(VenueCategory::RoomBased),
            "dispatch" => Ok(VenueCategory::Dispatch),
            "other" => Ok(VenueCategory::Other),
            other => Err(Error::InvalidInput(format!("Unknown venue category: {}", other))),
        }
    }
}

impl fmt::Display for VenueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page layout a venue's booking page uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutProfile {
    #[default]
    Standard,
    AltShift,
    AltAvailability,
    RosterB,
    RosterC,
}

impl LayoutProfile {
    pub const ALL: [LayoutProfile; 5] = [
        LayoutProfile::Standard,
        LayoutProfile::AltShift,
        LayoutProfile::AltAvailability,
        LayoutProfile::RosterB,
        LayoutProfile::RosterC,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutProfile::Standard => "standard",
            LayoutProfile::AltShift => "alt-shift",
            LayoutProfile::AltAvailability => "alt-availability",
            LayoutProfile::RosterB => "roster-b",
            LayoutProfile::RosterC => "roster-c",
        }
    }
}

impl FromStr for LayoutProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LayoutProfile::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| Error::InvalidInput(format!("Unknown layout profile: {}", s)))
    }
}

impl fmt::Display for LayoutProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked venue
///
/// Also the on-disk shape of `[[venues]]` entries in an import file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub prefecture: Option<String>,
    #[serde(default)]
    pub category: VenueCategory,
    /// Room count; meaningful for `RoomBased` venues only
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub open_time: Option<ClockTime>,
    #[serde(default)]
    pub close_time: Option<ClockTime>,
    #[serde(default)]
    pub layout: LayoutProfile,
    pub schedule_url: String,
    #[serde(default = "default_in_scope")]
    pub in_scope: bool,
}

fn default_in_scope() -> bool {
    true
}

impl Venue {
    /// Operating hours, or a configuration error naming the venue
    pub fn operating_hours(&self) -> Result<OperatingHours> {
        match (self.open_time, self.close_time) {
            (Some(open), Some(close)) => OperatingHours::new(open, close)
                .map_err(|e| Error::Config(format!("Venue {}: {}", self.id, e))),
            _ => Err(Error::Config(format!(
                "Venue {} ({}) has no operating hours",
                self.id, self.name
            ))),
        }
    }

    /// Capacity used to clamp the working count, if one applies
    pub fn capacity_ceiling(&self) -> Option<u32> {
        capacity_ceiling(self.category, self.capacity)
    }
}

/// Ceiling for a category/capacity pair: positive capacity on a room-based venue
pub fn capacity_ceiling(category: VenueCategory, capacity: Option<u32>) -> Option<u32> {
    match capacity {
        Some(c) if c > 0 && category.has_capacity_ceiling() => Some(c),
        _ => None,
    }
}

/// A worker listed on a venue's page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub venue_id: i64,
    pub worker_id: String,
    /// Profile page reference as it appeared on the booking page
    pub profile_ref: Option<String>,
    pub active: bool,
    pub first_seen: NaiveDateTime,
}

/// One classified observation of one worker at one capture time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub venue_id: i64,
    pub worker_id: String,
    pub on_shift: bool,
    pub working: bool,
    pub captured_at: NaiveDateTime,
}

/// Aggregated utilisation for one venue and business day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRate {
    pub venue_id: i64,
    pub business_date: NaiveDate,
    /// Percentage 0-100; `None` when no qualifying records existed
    pub working_rate: Option<f64>,
    /// On-shift records the rate was computed from
    pub sample_count: i64,
    pub computed_at: NaiveDateTime,
}
