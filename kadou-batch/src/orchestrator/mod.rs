//! Fetch orchestration
//!
//! Per venue: check the layout is supported, capture a page, classify
//! it. Across venues: one task per venue under a concurrency cap, with
//! each venue's failure isolated to that venue. Cancellation is checked
//! before each venue starts; a fetch already in flight runs to
//! completion or timeout.

pub mod inspection;
pub mod source;

use chrono::NaiveDateTime;
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use kadou_common::models::{StatusRecord, Venue};

use crate::classifier::{Classification, LayoutRegistry};
use crate::db::{status_records, workers};
use crate::error::{CollectError, UnsupportedLayout};
pub use source::{CapturedPage, HeldPageSource, LivePageSource, PageSource};

/// Classified snapshot of one venue
#[derive(Debug, Clone)]
pub struct VenueCollection {
    pub venue_id: i64,
    pub captured_at: NaiveDateTime,
    pub classification: Classification,
    pub records: Vec<StatusRecord>,
}

/// What happened to one venue in a batch
#[derive(Debug)]
pub enum VenueRun {
    Collected(VenueCollection),
    Failed(CollectError),
    /// Not started because the run was cancelled
    Cancelled,
}

/// Result of one batch across venues
#[derive(Debug)]
pub struct CollectionRun {
    pub run_id: Uuid,
    /// Per-venue results in completion order
    pub venues: Vec<(i64, VenueRun)>,
    pub elapsed: Duration,
}

impl CollectionRun {
    pub fn collected(&self) -> impl Iterator<Item = &VenueCollection> {
        self.venues.iter().filter_map(|(_, run)| match run {
            VenueRun::Collected(c) => Some(c),
            _ => None,
        })
    }

    pub fn records_for(&self, venue_id: i64) -> Option<&[StatusRecord]> {
        self.collected()
            .find(|c| c.venue_id == venue_id)
            .map(|c| c.records.as_slice())
    }

    pub fn failed_count(&self) -> usize {
        self.venues
            .iter()
            .filter(|(_, r)| matches!(r, VenueRun::Failed(_)))
            .count()
    }

    pub fn cancelled_count(&self) -> usize {
        self.venues
            .iter()
            .filter(|(_, r)| matches!(r, VenueRun::Cancelled))
            .count()
    }

    pub fn total_records(&self) -> usize {
        self.collected().map(|c| c.records.len()).sum()
    }
}

/// Drives page capture and classification for venues
pub struct FetchOrchestrator {
    source: Arc<dyn PageSource>,
    registry: LayoutRegistry,
    max_concurrent: usize,
}

impl FetchOrchestrator {
    pub fn new(source: Arc<dyn PageSource>, registry: LayoutRegistry, max_concurrent: usize) -> Self {
        Self {
            source,
            registry,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn registry(&self) -> &LayoutRegistry {
        &self.registry
    }

    /// Capture and classify one venue
    pub async fn collect_venue(&self, venue: &Venue) -> Result<VenueCollection, CollectError> {
        // Unsupported layouts are rejected before spending a request
        if !self.registry.is_supported(venue.layout) {
            return Err(UnsupportedLayout(venue.layout).into());
        }

        let page = self.source.capture(venue).await?;
        let classification = self
            .registry
            .classify(&page.content, page.captured_at, venue.layout)?;

        let d = &classification.diagnostics;
        match d.degraded {
            Some(degradation) => tracing::warn!(
                venue_id = venue.id,
                wrapper_blocks = d.wrapper_blocks,
                qualifying_blocks = d.qualifying_blocks,
                missing_worker_id = d.missing_worker_id,
                %degradation,
                "Classification degraded"
            ),
            None => tracing::info!(
                venue_id = venue.id,
                workers = classification.workers.len(),
                on_shift = classification.on_shift_count(),
                working = classification.working_count(),
                missing_worker_id = d.missing_worker_id,
                "Classified page"
            ),
        }

        let records = classification.to_records(venue.id, page.captured_at);
        Ok(VenueCollection {
            venue_id: venue.id,
            captured_at: page.captured_at,
            classification,
            records,
        })
    }

    /// Collect every venue under the concurrency cap
    pub async fn collect_all(&self, venues: Vec<Venue>, cancel: &CancellationToken) -> CollectionRun {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let total = venues.len();
        tracing::info!(%run_id, venues = total, max_concurrent = self.max_concurrent, "Collection run starting");

        let results: Vec<(i64, VenueRun)> = stream::iter(venues)
            .map(|venue| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return (venue.id, VenueRun::Cancelled);
                    }
                    match self.collect_venue(&venue).await {
                        Ok(collection) => (venue.id, VenueRun::Collected(collection)),
                        Err(e) => {
                            tracing::error!(
                                %run_id,
                                venue_id = venue.id,
                                venue = %venue.name,
                                error = %e,
                                "Venue collection failed"
                            );
                            (venue.id, VenueRun::Failed(e))
                        }
                    }
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let run = CollectionRun {
            run_id,
            venues: results,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            %run_id,
            venues = total,
            records = run.total_records(),
            failed = run.failed_count(),
            cancelled = run.cancelled_count(),
            elapsed_ms = run.elapsed.as_millis() as u64,
            "Collection run finished"
        );
        run
    }
}

/// Persist a run: append records and register workers, venue by venue
///
/// A storage failure for one venue is logged and does not stop the rest.
/// Returns the number of records written.
pub async fn store_run(pool: &SqlitePool, run: &CollectionRun, max_lock_wait_ms: u64) -> usize {
    let mut written = 0;
    for collection in run.collected() {
        if let Err(e) = workers::register_seen(
            pool,
            collection.venue_id,
            &collection.classification.seen_workers(),
            collection.captured_at,
        )
        .await
        {
            tracing::error!(venue_id = collection.venue_id, error = %e, "Worker registration failed");
        }

        match status_records::append_batch(pool, &collection.records, max_lock_wait_ms).await {
            Ok(n) => written += n,
            Err(e) => tracing::error!(
                venue_id = collection.venue_id,
                records = collection.records.len(),
                error = %e,
                "Status record append failed"
            ),
        }
    }
    written
}
