//! Daily rate aggregation
//!
//! For a venue and business date: take the records captured inside the
//! (possibly overnight) operating window, and compute
//! `working & on_shift / on_shift` as a percentage. On room-based venues
//! with a positive capacity the numerator is clamped to the capacity.
//! The result replaces any stored rate for the same key; a day with no
//! on-shift records is `NoData` and writes nothing.

pub mod summary;

use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use kadou_common::models::{DailyRate, Venue};
use kadou_common::time::{format_date, SiteClock};

use crate::db::{daily_rates, status_records, venues};
use crate::error::AggregationError;

/// Counts behind one rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateComputation {
    pub on_shift: usize,
    /// `working && on_shift` before any ceiling
    pub working: usize,
    /// Numerator actually used
    pub counted_working: usize,
    pub ceiling: Option<u32>,
}

impl RateComputation {
    /// Percentage 0-100, or `None` when nothing was on shift
    pub fn percentage(&self) -> Option<f64> {
        if self.on_shift == 0 {
            None
        } else {
            Some(self.counted_working as f64 / self.on_shift as f64 * 100.0)
        }
    }

    pub fn was_clamped(&self) -> bool {
        self.counted_working < self.working
    }
}

/// Count `(on_shift, working)` observations and apply the ceiling
pub fn compute_working_rate<I>(observations: I, ceiling: Option<u32>) -> RateComputation
where
    I: IntoIterator<Item = (bool, bool)>,
{
    let mut on_shift = 0;
    let mut working = 0;
    for (is_on_shift, is_working) in observations {
        if is_on_shift {
            on_shift += 1;
            if is_working {
                working += 1;
            }
        }
    }
    let counted_working = match ceiling {
        Some(cap) => working.min(cap as usize),
        None => working,
    };
    RateComputation {
        on_shift,
        working,
        counted_working,
        ceiling,
    }
}

/// Outcome of aggregating one (venue, date)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateOutcome {
    Rate { percentage: f64, sample_count: i64 },
    NoData,
}

/// Per-venue entry in an aggregation report
#[derive(Debug, Clone, PartialEq)]
pub enum VenueAggregation {
    Computed(f64),
    NoData,
    SkippedExisting,
    ConfigurationError(String),
    Failed(String),
    /// Not reached before the run was cancelled
    Cancelled,
}

impl fmt::Display for VenueAggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VenueAggregation::Computed(p) => write!(f, "{:.2}%", p),
            VenueAggregation::NoData => write!(f, "no data"),
            VenueAggregation::SkippedExisting => write!(f, "skipped (already computed)"),
            VenueAggregation::ConfigurationError(msg) => write!(f, "configuration error: {}", msg),
            VenueAggregation::Failed(msg) => write!(f, "failed: {}", msg),
            VenueAggregation::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of aggregating one business date
#[derive(Debug, Clone)]
pub struct AggregationReport {
    pub business_date: NaiveDate,
    pub venues: Vec<(i64, VenueAggregation)>,
    pub elapsed: Duration,
}

impl AggregationReport {
    pub fn count(&self, pred: impl Fn(&VenueAggregation) -> bool) -> usize {
        self.venues.iter().filter(|(_, v)| pred(v)).count()
    }

    pub fn computed(&self) -> usize {
        self.count(|v| matches!(v, VenueAggregation::Computed(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|v| matches!(v, VenueAggregation::Failed(_)))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|v| matches!(v, VenueAggregation::Cancelled))
    }
}

impl fmt::Display for AggregationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Aggregation for {}", format_date(self.business_date))?;
        for (venue_id, outcome) in &self.venues {
            writeln!(f, "  venue {:>6}: {}", venue_id, outcome)?;
        }
        write!(
            f,
            "  {} computed, {} no data, {} skipped, {} configuration errors, {} failed, {} cancelled in {:.1}s",
            self.computed(),
            self.count(|v| matches!(v, VenueAggregation::NoData)),
            self.count(|v| matches!(v, VenueAggregation::SkippedExisting)),
            self.count(|v| matches!(v, VenueAggregation::ConfigurationError(_))),
            self.failed(),
            self.cancelled(),
            self.elapsed.as_secs_f64()
        )
    }
}

/// Computes and stores daily rates
#[derive(Clone)]
pub struct RateAggregator {
    pool: SqlitePool,
    clock: SiteClock,
    max_lock_wait_ms: u64,
}

impl RateAggregator {
    pub fn new(pool: SqlitePool, clock: SiteClock, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            clock,
            max_lock_wait_ms,
        }
    }

    /// Compute, and store if there is data, the rate for a venue and date
    pub async fn compute_rate(
        &self,
        venue_id: i64,
        business_date: NaiveDate,
    ) -> Result<RateOutcome, AggregationError> {
        let venue = venues::load(&self.pool, venue_id)
            .await?
            .ok_or(AggregationError::VenueNotFound(venue_id))?
            .map_err(|bad| AggregationError::Configuration(bad.error.to_string()))?;
        self.compute_for_venue(&venue, business_date).await
    }

    pub async fn compute_for_venue(
        &self,
        venue: &Venue,
        business_date: NaiveDate,
    ) -> Result<RateOutcome, AggregationError> {
        let hours = venue
            .operating_hours()
            .map_err(|e| AggregationError::Configuration(e.to_string()))?;
        let window = hours.window(business_date);

        let records = status_records::select_in_window(&self.pool, venue.id, &window).await?;
        let computation = compute_working_rate(
            records.iter().map(|r| (r.on_shift, r.working)),
            venue.capacity_ceiling(),
        );

        let Some(percentage) = computation.percentage() else {
            tracing::info!(
                venue_id = venue.id,
                business_date = %business_date,
                records = records.len(),
                "No on-shift records in operating window"
            );
            return Ok(RateOutcome::NoData);
        };

        let sample_count = computation.on_shift as i64;
        let rate = DailyRate {
            venue_id: venue.id,
            business_date,
            working_rate: Some(percentage),
            sample_count,
            computed_at: self.clock.now(),
        };
        daily_rates::upsert(&self.pool, &rate, self.max_lock_wait_ms).await?;

        tracing::info!(
            venue_id = venue.id,
            business_date = %business_date,
            window = %hours,
            records = records.len(),
            on_shift = computation.on_shift,
            working = computation.working,
            counted_working = computation.counted_working,
            rate = percentage,
            "Daily rate computed"
        );

        Ok(RateOutcome::Rate {
            percentage,
            sample_count,
        })
    }

    /// Aggregate a business date for one venue or all in-scope venues
    ///
    /// Without `force`, venues that already have a rate for the date are
    /// skipped. Per-venue failures, including venue rows that do not
    /// parse, are recorded in the report. `cancel` is checked before each
    /// venue; venues not reached are reported as cancelled.
    pub async fn run_for_date(
        &self,
        business_date: NaiveDate,
        venue_filter: Option<i64>,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<AggregationReport, AggregationError> {
        let started = Instant::now();
        let targets = match venue_filter {
            Some(id) => vec![venues::load(&self.pool, id)
                .await?
                .ok_or(AggregationError::VenueNotFound(id))?],
            None => venues::load_in_scope(&self.pool).await?,
        };

        tracing::info!(
            business_date = %business_date,
            venues = targets.len(),
            force,
            "Aggregation run starting"
        );

        let mut results = Vec::with_capacity(targets.len());
        for loaded in &targets {
            let (venue_id, outcome) = match loaded {
                _ if cancel.is_cancelled() => {
                    (venue_id_of(loaded), VenueAggregation::Cancelled)
                }
                Ok(venue) => (venue.id, self.aggregate_one(venue, business_date, force).await),
                Err(bad) => (
                    bad.venue_id,
                    VenueAggregation::ConfigurationError(bad.error.to_string()),
                ),
            };
            if let VenueAggregation::Failed(msg) | VenueAggregation::ConfigurationError(msg) = &outcome {
                tracing::warn!(venue_id, error = %msg, "Venue aggregation not computed");
            }
            results.push((venue_id, outcome));
        }

        let report = AggregationReport {
            business_date,
            venues: results,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            business_date = %business_date,
            computed = report.computed(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Aggregation run finished"
        );
        Ok(report)
    }

    async fn aggregate_one(&self, venue: &Venue, business_date: NaiveDate, force: bool) -> VenueAggregation {
        if !force {
            match daily_rates::exists(&self.pool, venue.id, business_date).await {
                Ok(true) => return VenueAggregation::SkippedExisting,
                Ok(false) => {}
                Err(e) => return VenueAggregation::Failed(e.to_string()),
            }
        }

        match self.compute_for_venue(venue, business_date).await {
            Ok(RateOutcome::Rate { percentage, .. }) => VenueAggregation::Computed(percentage),
            Ok(RateOutcome::NoData) => VenueAggregation::NoData,
            Err(AggregationError::Configuration(msg)) => VenueAggregation::ConfigurationError(msg),
            Err(e) => VenueAggregation::Failed(e.to_string()),
        }
    }
}

fn venue_id_of(loaded: &venues::LoadedVenue) -> i64 {
    match loaded {
        Ok(venue) => venue.id,
        Err(bad) => bad.venue_id,
    }
}
