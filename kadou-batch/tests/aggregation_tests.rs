//! Rate aggregation against an in-memory database

mod helpers;

use chrono::NaiveDate;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use helpers::{ts, venue};
use kadou_batch::aggregator::summary::history_summary;
use kadou_batch::aggregator::{RateAggregator, RateOutcome, VenueAggregation};
use kadou_batch::db::{daily_rates, init_memory_pool, status_records, venues};
use kadou_batch::AggregationError;
use kadou_common::models::{DailyRate, StatusRecord, Venue, VenueCategory};
use kadou_common::time::{parse_date, SiteClock};

const LOCK_WAIT_MS: u64 = 1000;

fn date(s: &str) -> NaiveDate {
    parse_date(s).expect("valid test date")
}

async fn setup(venue_list: &[Venue]) -> (SqlitePool, RateAggregator) {
    let pool = init_memory_pool().await.expect("memory pool");
    for v in venue_list {
        venues::upsert(&pool, v).await.expect("venue upsert");
    }
    let aggregator = RateAggregator::new(pool.clone(), SiteClock::jst(), LOCK_WAIT_MS);
    (pool, aggregator)
}

async fn record(pool: &SqlitePool, venue_id: i64, worker: &str, at: &str, on_shift: bool, working: bool) {
    let r = StatusRecord {
        venue_id,
        worker_id: worker.to_string(),
        on_shift,
        working,
        captured_at: ts(at),
    };
    status_records::append_batch(pool, &[r], LOCK_WAIT_MS)
        .await
        .expect("append record");
}

/// `working` working and `idle` idle on-shift records at one capture time
async fn snapshot(pool: &SqlitePool, venue_id: i64, at: &str, working: usize, idle: usize) {
    let mut records = Vec::new();
    for i in 0..working + idle {
        records.push(StatusRecord {
            venue_id,
            worker_id: format!("w{}", i),
            on_shift: true,
            working: i < working,
            captured_at: ts(at),
        });
    }
    status_records::append_batch(pool, &records, LOCK_WAIT_MS)
        .await
        .expect("append snapshot");
}

fn rate_of(outcome: RateOutcome) -> f64 {
    match outcome {
        RateOutcome::Rate { percentage, .. } => percentage,
        RateOutcome::NoData => panic!("expected a rate"),
    }
}

#[tokio::test]
async fn test_overnight_window_selection() {
    // 18:00-05:00: business day 2024-05-01 runs until 05:00 on the 2nd
    let (pool, aggregator) = setup(&[venue(1)]).await;

    record(&pool, 1, "a", "2024-05-01 17:59:59", true, true).await;
    record(&pool, 1, "a", "2024-05-01 18:00:00", true, true).await;
    record(&pool, 1, "b", "2024-05-02 03:00:00", true, false).await;
    record(&pool, 1, "c", "2024-05-02 05:00:00", true, true).await;
    record(&pool, 1, "d", "2024-05-02 05:00:01", true, false).await;
    record(&pool, 1, "e", "2024-05-02 01:00:00", false, true).await;

    let outcome = aggregator.compute_rate(1, date("2024-05-01")).await.unwrap();
    let RateOutcome::Rate {
        percentage,
        sample_count,
    } = outcome
    else {
        panic!("expected a rate");
    };
    assert_eq!(sample_count, 3);
    assert!((percentage - 200.0 / 3.0).abs() < 1e-9);

    let stored = daily_rates::get(&pool, 1, date("2024-05-01")).await.unwrap().unwrap();
    assert_eq!(stored.working_rate, Some(percentage));
    assert_eq!(stored.sample_count, 3);
}

#[tokio::test]
async fn test_same_day_window() {
    let mut v = venue(2);
    v.open_time = Some("10:00".parse().unwrap());
    v.close_time = Some("22:00".parse().unwrap());
    let (pool, aggregator) = setup(&[v]).await;

    snapshot(&pool, 2, "2024-05-01 12:00:00", 1, 3).await;
    snapshot(&pool, 2, "2024-05-01 23:00:00", 4, 0).await;

    let rate = rate_of(aggregator.compute_rate(2, date("2024-05-01")).await.unwrap());
    assert_eq!(rate, 25.0);
}

#[tokio::test]
async fn test_capacity_ceiling_on_room_based_only() {
    let mut room = venue(10);
    room.category = VenueCategory::RoomBased;
    room.capacity = Some(5);
    let mut dispatch = venue(11);
    dispatch.category = VenueCategory::Dispatch;
    dispatch.capacity = Some(5);
    let mut unset = venue(12);
    unset.category = VenueCategory::RoomBased;
    unset.capacity = Some(0);

    let (pool, aggregator) = setup(&[room, dispatch, unset]).await;
    for id in [10, 11, 12] {
        snapshot(&pool, id, "2024-05-01 21:00:00", 8, 2).await;
    }

    let day = date("2024-05-01");
    assert_eq!(rate_of(aggregator.compute_rate(10, day).await.unwrap()), 50.0);
    assert_eq!(rate_of(aggregator.compute_rate(11, day).await.unwrap()), 80.0);
    assert_eq!(rate_of(aggregator.compute_rate(12, day).await.unwrap()), 80.0);
}

#[tokio::test]
async fn test_no_data_writes_nothing() {
    let (pool, aggregator) = setup(&[venue(3)]).await;
    let day = date("2024-05-01");

    assert_eq!(aggregator.compute_rate(3, day).await.unwrap(), RateOutcome::NoData);
    assert!(daily_rates::get(&pool, 3, day).await.unwrap().is_none());

    record(&pool, 3, "a", "2024-05-01 20:00:00", false, false).await;
    record(&pool, 3, "b", "2024-05-01 21:00:00", false, true).await;
    assert_eq!(aggregator.compute_rate(3, day).await.unwrap(), RateOutcome::NoData);
    assert!(!daily_rates::exists(&pool, 3, day).await.unwrap());
}

#[tokio::test]
async fn test_missing_hours_is_configuration_error() {
    let mut v = venue(4);
    v.close_time = None;
    let (pool, aggregator) = setup(&[v]).await;
    snapshot(&pool, 4, "2024-05-01 21:00:00", 1, 1).await;

    let err = aggregator.compute_rate(4, date("2024-05-01")).await.unwrap_err();
    assert!(matches!(err, AggregationError::Configuration(_)));

    let report = aggregator
        .run_for_date(date("2024-05-01"), None, false, &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(report.venues[0].1, VenueAggregation::ConfigurationError(_)));
    assert!(!daily_rates::exists(&pool, 4, date("2024-05-01")).await.unwrap());
}

#[tokio::test]
async fn test_unreadable_venue_row_does_not_stop_run() {
    let (pool, aggregator) = setup(&[venue(1), venue(2)]).await;
    sqlx::query("UPDATE venues SET open_time = '9pm' WHERE venue_id = 2")
        .execute(&pool)
        .await
        .unwrap();
    snapshot(&pool, 1, "2024-05-01 21:00:00", 1, 1).await;
    snapshot(&pool, 2, "2024-05-01 21:00:00", 1, 1).await;
    let day = date("2024-05-01");

    let report = aggregator
        .run_for_date(day, None, false, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.venues.len(), 2);
    assert_eq!(report.venues[0], (1, VenueAggregation::Computed(50.0)));
    assert_eq!(report.venues[1].0, 2);
    assert!(matches!(report.venues[1].1, VenueAggregation::ConfigurationError(_)));
    assert!(daily_rates::exists(&pool, 1, day).await.unwrap());
    assert!(!daily_rates::exists(&pool, 2, day).await.unwrap());

    let single = aggregator
        .run_for_date(day, Some(2), true, &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(single.venues[0], (2, VenueAggregation::ConfigurationError(_))));
    let err = aggregator.compute_rate(2, day).await.unwrap_err();
    assert!(matches!(err, AggregationError::Configuration(_)));
}

#[tokio::test]
async fn test_cancelled_run_leaves_venues_untouched() {
    let (pool, aggregator) = setup(&[venue(1), venue(2)]).await;
    snapshot(&pool, 1, "2024-05-01 21:00:00", 1, 1).await;
    snapshot(&pool, 2, "2024-05-01 21:00:00", 2, 0).await;
    let day = date("2024-05-01");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = aggregator.run_for_date(day, None, false, &cancel).await.unwrap();
    assert_eq!(report.cancelled(), 2);
    assert_eq!(report.computed(), 0);
    assert!(report.to_string().contains("2 cancelled"));
    for id in [1, 2] {
        assert!(!daily_rates::exists(&pool, id, day).await.unwrap());
    }

    // A later uncancelled run still picks the date up
    let rerun = aggregator
        .run_for_date(day, None, false, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(rerun.computed(), 2);
}

#[tokio::test]
async fn test_forced_no_data_keeps_stored_rate() {
    let (pool, aggregator) = setup(&[venue(3)]).await;
    let day = date("2024-05-01");
    let prior = DailyRate {
        venue_id: 3,
        business_date: day,
        working_rate: Some(40.0),
        sample_count: 5,
        computed_at: ts("2024-05-02 06:00:00"),
    };
    daily_rates::upsert(&pool, &prior, LOCK_WAIT_MS).await.unwrap();

    let report = aggregator
        .run_for_date(day, Some(3), true, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.venues, vec![(3, VenueAggregation::NoData)]);
    assert_eq!(daily_rates::get(&pool, 3, day).await.unwrap(), Some(prior));
}

#[tokio::test]
async fn test_unknown_venue() {
    let (_pool, aggregator) = setup(&[]).await;
    let err = aggregator.compute_rate(99, date("2024-05-01")).await.unwrap_err();
    assert!(matches!(err, AggregationError::VenueNotFound(99)));
}

#[tokio::test]
async fn test_recompute_is_idempotent() {
    let (pool, aggregator) = setup(&[venue(5)]).await;
    let day = date("2024-05-01");
    snapshot(&pool, 5, "2024-05-01 21:00:00", 3, 1).await;

    let first = aggregator.compute_rate(5, day).await.unwrap();
    let second = aggregator.compute_rate(5, day).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(rate_of(first), 75.0);

    let history = daily_rates::since(&pool, 5, day).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_run_skips_existing_unless_forced() {
    let (pool, aggregator) = setup(&[venue(6), venue(7)]).await;
    let day = date("2024-05-01");
    snapshot(&pool, 6, "2024-05-01 21:00:00", 1, 1).await;
    snapshot(&pool, 7, "2024-05-01 22:00:00", 2, 0).await;

    let cancel = CancellationToken::new();
    let report = aggregator.run_for_date(day, None, false, &cancel).await.unwrap();
    assert_eq!(report.computed(), 2);
    assert_eq!(report.failed(), 0);

    // Late records arrive; a plain rerun keeps the stored rates
    snapshot(&pool, 6, "2024-05-01 23:00:00", 0, 2).await;
    let rerun = aggregator.run_for_date(day, None, false, &cancel).await.unwrap();
    assert!(rerun
        .venues
        .iter()
        .all(|(_, v)| *v == VenueAggregation::SkippedExisting));
    let kept = daily_rates::get(&pool, 6, day).await.unwrap().unwrap();
    assert_eq!(kept.working_rate, Some(50.0));

    let forced = aggregator
        .run_for_date(day, Some(6), true, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(forced.venues, vec![(6, VenueAggregation::Computed(25.0))]);
    let replaced = daily_rates::get(&pool, 6, day).await.unwrap().unwrap();
    assert_eq!(replaced.working_rate, Some(25.0));
    assert_eq!(replaced.sample_count, 4);
}

#[tokio::test]
async fn test_run_only_covers_in_scope_venues() {
    let mut retired = venue(8);
    retired.in_scope = false;
    let (pool, aggregator) = setup(&[venue(9), retired]).await;
    snapshot(&pool, 8, "2024-05-01 21:00:00", 1, 0).await;
    snapshot(&pool, 9, "2024-05-01 21:00:00", 1, 0).await;

    let report = aggregator
        .run_for_date(date("2024-05-01"), None, false, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.venues.len(), 1);
    assert_eq!(report.venues[0].0, 9);
    assert!(report.to_string().contains("1 computed"));
}

#[tokio::test]
async fn test_history_summary_over_aggregated_days() {
    let (pool, aggregator) = setup(&[venue(20)]).await;
    snapshot(&pool, 20, "2024-05-07 21:00:00", 1, 1).await;
    snapshot(&pool, 20, "2024-05-08 21:00:00", 3, 1).await;
    snapshot(&pool, 20, "2024-05-09 21:00:00", 1, 3).await;
    for d in ["2024-05-07", "2024-05-08", "2024-05-09", "2024-05-06"] {
        aggregator.compute_rate(20, date(d)).await.unwrap();
    }

    let summary = history_summary(&pool, 20, 7, date("2024-05-10")).await.unwrap();
    assert_eq!(summary.history.len(), 3);
    assert_eq!(summary.history[0].business_date, date("2024-05-09"));
    let stats = summary.stats.unwrap();
    assert_eq!(stats.max, 75.0);
    assert_eq!(stats.min, 25.0);
    assert!((stats.average - 50.0).abs() < 1e-9);
}
