//! Scheduler
//!
//! Two independent drivers: collection at a fixed cadence (each cycle
//! gated on venue operating hours) and aggregation once a day for the
//! previous business date. Each driver allows one run at a time and
//! drops triggers handled later than its misfire grace.

pub mod driver;
pub mod jobs;
pub mod state;

use anyhow::anyhow;
use chrono::NaiveTime;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use kadou_common::config::SchedulerConfig;
use kadou_common::time::SiteClock;

pub use driver::{DriverHandle, Job, PeriodicDriver, Trigger};
pub use jobs::{AggregationJob, CollectionJob};
pub use state::{DriverState, DriverStateMachine, DriverStats, SkipReason, TriggerDecision};

pub struct Scheduler {
    drivers: Vec<PeriodicDriver>,
}

impl Scheduler {
    pub fn new(drivers: Vec<PeriodicDriver>) -> Self {
        Self { drivers }
    }

    /// Collection and aggregation drivers from configuration
    pub fn from_config(
        config: &SchedulerConfig,
        collection: Arc<dyn Job>,
        aggregation: Arc<dyn Job>,
        clock: SiteClock,
    ) -> anyhow::Result<Self> {
        let aggregation_at = NaiveTime::from_hms_opt(config.aggregation_hour, config.aggregation_minute, 0)
            .ok_or_else(|| {
                anyhow!(
                    "Invalid aggregation time {}:{:02}",
                    config.aggregation_hour,
                    config.aggregation_minute
                )
            })?;

        Ok(Self::new(vec![
            PeriodicDriver::new(
                Trigger::Every(Duration::from_secs(config.collection_interval_minutes * 60)),
                Duration::from_secs(config.collection_misfire_grace_secs),
                collection,
                clock,
            ),
            PeriodicDriver::new(
                Trigger::DailyAt(aggregation_at),
                Duration::from_secs(config.aggregation_misfire_grace_secs),
                aggregation,
                clock,
            ),
        ]))
    }

    /// Run every driver until `shutdown` is cancelled and all have stopped
    pub async fn run(self, shutdown: CancellationToken) -> Vec<(String, DriverStats)> {
        info!(drivers = self.drivers.len(), "Scheduler starting");
        let handles: Vec<DriverHandle> = self
            .drivers
            .into_iter()
            .map(|d| d.spawn(shutdown.clone()))
            .collect();

        let mut stats = Vec::with_capacity(handles.len());
        for handle in handles {
            let name = handle.name().to_string();
            stats.push((name, handle.join().await));
        }
        info!("Scheduler stopped");
        stats
    }
}
