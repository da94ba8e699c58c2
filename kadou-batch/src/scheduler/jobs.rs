//! Scheduled jobs: collection during operating hours, daily aggregation

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kadou_common::config::KadouConfig;
use kadou_common::models::Venue;
use kadou_common::time::SiteClock;

use crate::aggregator::{AggregationReport, RateAggregator};
use crate::db::venues::{self, LoadedVenue};
use crate::orchestrator::{store_run, CollectionRun, FetchOrchestrator};

use super::driver::Job;

/// Venues split by whether they are open now
#[derive(Debug, Default)]
pub struct VenueGate {
    pub open: Vec<Venue>,
    pub closed: Vec<i64>,
    /// Venues without usable operating hours, with the reason
    pub misconfigured: Vec<(i64, String)>,
}

/// Split venues on operating hours, widened by `buffer`
pub fn gate_venues(venues: Vec<Venue>, now: NaiveDateTime, buffer: chrono::Duration) -> VenueGate {
    let mut gate = VenueGate::default();
    for venue in venues {
        match venue.operating_hours() {
            Ok(hours) if hours.is_open_at(now, buffer) => gate.open.push(venue),
            Ok(_) => gate.closed.push(venue.id),
            Err(e) => gate.misconfigured.push((venue.id, e.to_string())),
        }
    }
    gate
}

/// Outcome of one collection cycle
#[derive(Debug)]
pub struct CollectionSummary {
    pub run: CollectionRun,
    pub closed: usize,
    pub misconfigured: usize,
    pub stored: usize,
}

/// Fetch, classify and store a snapshot of every open venue
pub struct CollectionJob {
    pool: SqlitePool,
    orchestrator: Arc<FetchOrchestrator>,
    clock: SiteClock,
    buffer: chrono::Duration,
    max_lock_wait_ms: u64,
    venue_filter: Option<i64>,
    force: bool,
}

impl CollectionJob {
    pub fn new(
        pool: SqlitePool,
        orchestrator: Arc<FetchOrchestrator>,
        clock: SiteClock,
        config: &KadouConfig,
    ) -> Self {
        Self {
            pool,
            orchestrator,
            clock,
            buffer: chrono::Duration::minutes(config.scheduler.business_hours_buffer_minutes),
            max_lock_wait_ms: config.db_max_lock_wait_ms,
            venue_filter: None,
            force: false,
        }
    }

    /// Restrict the cycle to one venue (in scope or not)
    pub fn with_venue(mut self, venue_id: i64) -> Self {
        self.venue_filter = Some(venue_id);
        self
    }

    /// Ignore operating hours
    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    async fn targets(&self) -> anyhow::Result<Vec<LoadedVenue>> {
        match self.venue_filter {
            Some(id) => {
                let venue = venues::load(&self.pool, id)
                    .await
                    .context("Failed to load venue")?
                    .ok_or_else(|| anyhow!("Venue {} not found", id))?;
                Ok(vec![venue])
            }
            None => venues::load_in_scope(&self.pool)
                .await
                .context("Failed to list in-scope venues"),
        }
    }

    pub async fn execute(&self, cancel: &CancellationToken) -> anyhow::Result<CollectionSummary> {
        let mut readable = Vec::new();
        let mut misconfigured = Vec::new();
        for loaded in self.targets().await? {
            match loaded {
                Ok(venue) => readable.push(venue),
                Err(bad) => misconfigured.push((bad.venue_id, bad.error.to_string())),
            }
        }

        let (open, closed) = if self.force {
            (readable, 0)
        } else {
            let gate = gate_venues(readable, self.clock.now(), self.buffer);
            misconfigured.extend(gate.misconfigured);
            (gate.open, gate.closed.len())
        };
        for (venue_id, reason) in &misconfigured {
            warn!(venue_id, error = %reason, "Venue not collected: configuration error");
        }
        let misconfigured = misconfigured.len();

        info!(
            open = open.len(),
            closed,
            misconfigured,
            force = self.force,
            "Collection cycle starting"
        );

        let run = self.orchestrator.collect_all(open, cancel).await;
        let stored = store_run(&self.pool, &run, self.max_lock_wait_ms).await;

        Ok(CollectionSummary {
            run,
            closed,
            misconfigured,
            stored,
        })
    }
}

#[async_trait]
impl Job for CollectionJob {
    fn name(&self) -> &str {
        "collection"
    }

    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let summary = self.execute(&cancel).await?;
        info!(
            run_id = %summary.run.run_id,
            stored = summary.stored,
            failed = summary.run.failed_count(),
            "Collection cycle finished"
        );
        Ok(())
    }
}

/// Aggregate the previous site-local business date
pub struct AggregationJob {
    aggregator: RateAggregator,
    clock: SiteClock,
}

impl AggregationJob {
    pub fn new(aggregator: RateAggregator, clock: SiteClock) -> Self {
        Self { aggregator, clock }
    }

    pub fn target_date(&self) -> anyhow::Result<NaiveDate> {
        self.clock
            .today()
            .pred_opt()
            .ok_or_else(|| anyhow!("No date before {}", self.clock.today()))
    }

    pub async fn execute(&self, cancel: &CancellationToken) -> anyhow::Result<AggregationReport> {
        let date = self.target_date()?;
        self.aggregator
            .run_for_date(date, None, false, cancel)
            .await
            .with_context(|| format!("Aggregation for {} failed", date))
    }
}

#[async_trait]
impl Job for AggregationJob {
    fn name(&self) -> &str {
        "aggregation"
    }

    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let report = self.execute(&cancel).await?;
        info!(
            business_date = %report.business_date,
            computed = report.computed(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            "Daily aggregation finished"
        );
        Ok(())
    }
}
