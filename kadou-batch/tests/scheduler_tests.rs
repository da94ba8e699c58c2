//! Driver overlap, failure isolation, shutdown and scheduled jobs

mod helpers;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use helpers::{block, page, ts, venue};
use kadou_batch::aggregator::RateAggregator;
use kadou_batch::classifier::LayoutRegistry;
use kadou_batch::db::{init_memory_pool, status_records, venues};
use kadou_batch::orchestrator::{CapturedPage, FetchOrchestrator, PageSource};
use kadou_batch::scheduler::{
    AggregationJob, CollectionJob, DriverState, Job, PeriodicDriver, Scheduler, Trigger,
};
use kadou_batch::CollectError;
use kadou_common::config::{KadouConfig, SchedulerConfig};
use kadou_common::models::Venue;
use kadou_common::time::SiteClock;

/// Sleeps for `duration` or until cancelled
struct SlowJob {
    duration: Duration,
    runs: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    saw_cancel: AtomicBool,
}

impl SlowJob {
    fn new(duration: Duration) -> Self {
        Self {
            duration,
            runs: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            saw_cancel: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Job for SlowJob {
    fn name(&self) -> &str {
        "slow"
    }

    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::select! {
            _ = tokio::time::sleep(self.duration) => {}
            _ = cancel.cancelled() => self.saw_cancel.store(true, Ordering::SeqCst),
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails, then panics, then succeeds
struct FlakyJob {
    runs: AtomicUsize,
}

#[async_trait]
impl Job for FlakyJob {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn run(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        match self.runs.fetch_add(1, Ordering::SeqCst) {
            0 => anyhow::bail!("first run fails"),
            1 => panic!("second run panics"),
            _ => Ok(()),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_trigger_is_skipped() {
    let job = Arc::new(SlowJob::new(Duration::from_secs(25)));
    let driver = PeriodicDriver::new(
        Trigger::Every(Duration::from_secs(10)),
        Duration::from_secs(5),
        job.clone(),
        SiteClock::jst(),
    );
    let shutdown = CancellationToken::new();
    let handle = driver.spawn(shutdown.clone());

    // Fires at 10..=100; runs start at 10, 40, 70, 100
    tokio::time::sleep(Duration::from_secs(105)).await;
    assert!(matches!(handle.state(), DriverState::Running { .. }));
    shutdown.cancel();
    let stats = handle.join().await;

    assert_eq!(job.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(stats.started, 4);
    assert_eq!(stats.skipped_running, 6);
    assert_eq!(stats.skipped_misfire, 0);
    assert_eq!(stats.succeeded, 4);
    assert_eq!(job.runs.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_failures_and_panics_do_not_stop_driver() {
    let job = Arc::new(FlakyJob {
        runs: AtomicUsize::new(0),
    });
    let driver = PeriodicDriver::new(
        Trigger::Every(Duration::from_secs(10)),
        Duration::from_secs(5),
        job.clone(),
        SiteClock::jst(),
    );
    let shutdown = CancellationToken::new();
    let handle = driver.spawn(shutdown.clone());

    tokio::time::sleep(Duration::from_secs(35)).await;
    shutdown.cancel();
    let stats = handle.join().await;

    assert_eq!(job.runs.load(Ordering::SeqCst), 3);
    assert_eq!(stats.started, 3);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.succeeded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_in_flight_run() {
    let job = Arc::new(SlowJob::new(Duration::from_secs(3600)));
    let driver = PeriodicDriver::new(
        Trigger::Every(Duration::from_secs(10)),
        Duration::from_secs(5),
        job.clone(),
        SiteClock::jst(),
    );
    let shutdown = CancellationToken::new();
    let handle = driver.spawn(shutdown.clone());

    tokio::time::sleep(Duration::from_secs(15)).await;
    shutdown.cancel();
    let stats = handle.join().await;

    assert!(job.saw_cancel.load(Ordering::SeqCst));
    assert_eq!(job.active.load(Ordering::SeqCst), 0);
    assert_eq!(stats.started, 1);
    assert_eq!(stats.succeeded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_runs_both_drivers() {
    let collection = Arc::new(SlowJob::new(Duration::from_secs(1)));
    let aggregation = Arc::new(FlakyJob {
        runs: AtomicUsize::new(0),
    });
    let config = SchedulerConfig {
        collection_interval_minutes: 1,
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::from_config(
        &config,
        collection.clone(),
        aggregation.clone(),
        SiteClock::jst(),
    )
    .unwrap();

    let shutdown = CancellationToken::new();
    let stopper = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(150)).await;
        stopper.cancel();
    });

    let stats = scheduler.run(shutdown).await;
    let names: Vec<&str> = stats.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["slow", "flaky"]);
    assert_eq!(stats[0].1.started, 2);
    assert_eq!(collection.runs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_invalid_aggregation_time_is_rejected() {
    let config = SchedulerConfig {
        aggregation_hour: 25,
        ..SchedulerConfig::default()
    };
    let job: Arc<dyn Job> = Arc::new(SlowJob::new(Duration::from_secs(1)));
    assert!(Scheduler::from_config(&config, job.clone(), job, SiteClock::jst()).is_err());
}

/// Always serves one two-worker page
struct StaticSource;

#[async_trait]
impl PageSource for StaticSource {
    async fn capture(&self, venue: &Venue) -> Result<CapturedPage, CollectError> {
        Ok(CapturedPage {
            content: page(&[
                block("1", "18:00～02:00", "23:00"),
                block("2", "18:00～02:00", "19:00"),
            ]),
            captured_at: ts("2024-05-01 21:00:00"),
            origin: format!("static://{}", venue.id),
        })
    }
}

fn collection_job(pool: &sqlx::SqlitePool) -> CollectionJob {
    let orchestrator = Arc::new(FetchOrchestrator::new(
        Arc::new(StaticSource),
        LayoutRegistry::builtin(),
        2,
    ));
    CollectionJob::new(pool.clone(), orchestrator, SiteClock::jst(), &KadouConfig::default())
}

#[tokio::test]
async fn test_forced_collection_stores_every_in_scope_venue() {
    let pool = init_memory_pool().await.unwrap();
    let mut out_of_scope = venue(3);
    out_of_scope.in_scope = false;
    for v in [venue(1), venue(2), out_of_scope] {
        venues::upsert(&pool, &v).await.unwrap();
    }

    let summary = collection_job(&pool)
        .forced(true)
        .execute(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.run.venues.len(), 2);
    assert_eq!(summary.stored, 4);
    assert_eq!(status_records::count_for_venue(&pool, 1).await.unwrap(), 2);
    assert_eq!(status_records::count_for_venue(&pool, 3).await.unwrap(), 0);
}

#[tokio::test]
async fn test_collection_skips_venues_without_hours() {
    let pool = init_memory_pool().await.unwrap();
    let mut no_hours = venue(5);
    no_hours.open_time = None;
    venues::upsert(&pool, &no_hours).await.unwrap();

    let summary = collection_job(&pool)
        .execute(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.misconfigured, 1);
    assert!(summary.run.venues.is_empty());
    assert_eq!(status_records::count_for_venue(&pool, 5).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unreadable_venue_row_is_misconfigured() {
    let pool = init_memory_pool().await.unwrap();
    for v in [venue(1), venue(2)] {
        venues::upsert(&pool, &v).await.unwrap();
    }
    sqlx::query("UPDATE venues SET open_time = '9pm' WHERE venue_id = 2")
        .execute(&pool)
        .await
        .unwrap();

    let summary = collection_job(&pool)
        .forced(true)
        .execute(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.misconfigured, 1);
    assert_eq!(summary.run.venues.len(), 1);
    assert_eq!(summary.stored, 2);
    assert_eq!(status_records::count_for_venue(&pool, 1).await.unwrap(), 2);
    assert_eq!(status_records::count_for_venue(&pool, 2).await.unwrap(), 0);

    let gated = collection_job(&pool)
        .execute(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(gated.misconfigured, 1);
}

#[tokio::test]
async fn test_single_venue_collection() {
    let pool = init_memory_pool().await.unwrap();
    let mut out_of_scope = venue(8);
    out_of_scope.in_scope = false;
    venues::upsert(&pool, &out_of_scope).await.unwrap();

    let summary = collection_job(&pool)
        .with_venue(8)
        .forced(true)
        .execute(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.stored, 2);

    let missing = collection_job(&pool)
        .with_venue(404)
        .execute(&CancellationToken::new())
        .await;
    assert!(missing.is_err());
}

#[tokio::test]
async fn test_aggregation_job_targets_previous_day() {
    let pool = init_memory_pool().await.unwrap();
    let clock = SiteClock::jst();
    let job = AggregationJob::new(RateAggregator::new(pool, clock, 1000), clock);
    assert_eq!(job.target_date().unwrap(), clock.today().pred_opt().unwrap());

    let report = job.execute(&CancellationToken::new()).await.unwrap();
    assert!(report.venues.is_empty());
}

#[tokio::test]
async fn test_aggregation_job_honours_cancellation() {
    let pool = init_memory_pool().await.unwrap();
    venues::upsert(&pool, &venue(1)).await.unwrap();
    let clock = SiteClock::jst();
    let job = AggregationJob::new(RateAggregator::new(pool, clock, 1000), clock);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = job.execute(&cancel).await.unwrap();
    assert_eq!(report.cancelled(), 1);
    assert_eq!(report.computed(), 0);
}
