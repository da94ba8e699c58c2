//! Rate history summary for one venue

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use sqlx::SqlitePool;
use std::fmt;

use kadou_common::models::DailyRate;
use kadou_common::time::format_date;
use kadou_common::Result;

use crate::db::daily_rates;

/// Statistics over the non-null rates in a history
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateStats {
    pub average: f64,
    pub max: f64,
    pub min: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySummary {
    pub venue_id: i64,
    pub days: u32,
    /// Newest first
    pub history: Vec<DailyRate>,
    /// `None` when no day in the history has a rate
    pub stats: Option<RateStats>,
}

impl HistorySummary {
    pub fn from_history(venue_id: i64, days: u32, history: Vec<DailyRate>) -> Self {
        let rates: Vec<f64> = history.iter().filter_map(|r| r.working_rate).collect();
        let stats = if rates.is_empty() {
            None
        } else {
            Some(RateStats {
                average: rates.iter().sum::<f64>() / rates.len() as f64,
                max: rates.iter().copied().fold(f64::MIN, f64::max),
                min: rates.iter().copied().fold(f64::MAX, f64::min),
            })
        };
        Self {
            venue_id,
            days,
            history,
            stats,
        }
    }
}

/// Rates dated within the last `days` days before (and including) `today`
pub async fn history_summary(
    pool: &SqlitePool,
    venue_id: i64,
    days: u32,
    today: NaiveDate,
) -> Result<HistorySummary> {
    let from = today - Duration::days(i64::from(days));
    let history = daily_rates::since(pool, venue_id, from).await?;
    Ok(HistorySummary::from_history(venue_id, days, history))
}

impl fmt::Display for HistorySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Venue {} - last {} days", self.venue_id, self.days)?;
        for rate in &self.history {
            match rate.working_rate {
                Some(p) => writeln!(f, "  {}  {:>6.2}%", format_date(rate.business_date), p)?,
                None => writeln!(f, "  {}     n/a", format_date(rate.business_date))?,
            }
        }
        match &self.stats {
            Some(s) => write!(
                f,
                "  days: {}  average: {:.2}%  max: {:.2}%  min: {:.2}%",
                self.history.len(),
                s.average,
                s.max,
                s.min
            ),
            None => write!(f, "  days: {}  no rates recorded", self.history.len()),
        }
    }
}
