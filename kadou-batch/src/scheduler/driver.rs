//! Periodic driver
//!
//! One loop per job. Each trigger goes through the driver's
//! [`DriverStateMachine`]; a started run is spawned and supervised so the
//! loop keeps ticking while it runs. Errors and panics in a run are
//! logged and mark the run failed; they never stop the driver.

use async_trait::async_trait;
use chrono::{NaiveDateTime, NaiveTime};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use kadou_common::time::SiteClock;

use super::state::{DriverState, DriverStateMachine, DriverStats, RunOutcome, TriggerDecision};

/// Work a driver runs on each trigger
#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// `cancel` fires on shutdown; jobs check it between units of work
    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// When a driver fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Fixed cadence, first fire one period after start
    Every(Duration),
    /// Once a day at a site-local wall time
    DailyAt(NaiveTime),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Every(period) => write!(f, "every {}s", period.as_secs()),
            Trigger::DailyAt(time) => write!(f, "daily at {}", time.format("%H:%M")),
        }
    }
}

/// Time from `now` until the next `at` strictly after it
pub fn daily_delay(at: NaiveTime, now: NaiveDateTime) -> Duration {
    let mut next = now.date().and_time(at);
    if next <= now {
        next += chrono::Duration::days(1);
    }
    (next - now).to_std().unwrap_or_default()
}

impl Trigger {
    /// First scheduled instant after the driver starts at `start`
    fn first(&self, start: Instant, clock: &SiteClock) -> Instant {
        match self {
            Trigger::Every(period) => start + *period,
            Trigger::DailyAt(at) => start + daily_delay(*at, clock.now()),
        }
    }

    /// Next scheduled instant after `scheduled` was handled at `now`
    ///
    /// Missed fires collapse into one: the result is always after `now`.
    fn after(&self, scheduled: Instant, now: Instant, clock: &SiteClock) -> Instant {
        match self {
            Trigger::Every(period) => {
                let mut next = scheduled + *period;
                while next <= now {
                    next += *period;
                }
                next
            }
            // One minute past the fire so wall-clock jitter cannot refire
            Trigger::DailyAt(at) => {
                now + daily_delay(*at, clock.now() + chrono::Duration::minutes(1))
                    + Duration::from_secs(60)
            }
        }
    }
}

fn lock(machine: &Mutex<DriverStateMachine>) -> MutexGuard<'_, DriverStateMachine> {
    machine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct PeriodicDriver {
    trigger: Trigger,
    job: Arc<dyn Job>,
    clock: SiteClock,
    machine: Arc<Mutex<DriverStateMachine>>,
}

impl PeriodicDriver {
    pub fn new(trigger: Trigger, misfire_grace: Duration, job: Arc<dyn Job>, clock: SiteClock) -> Self {
        Self {
            trigger,
            job,
            clock,
            machine: Arc::new(Mutex::new(DriverStateMachine::new(misfire_grace))),
        }
    }

    pub fn name(&self) -> &str {
        self.job.name()
    }

    /// Start the driver loop; it stops when `shutdown` is cancelled
    pub fn spawn(self, shutdown: CancellationToken) -> DriverHandle {
        let machine = Arc::clone(&self.machine);
        let name = self.job.name().to_string();
        let task = tokio::spawn(self.run_loop(shutdown));
        DriverHandle {
            name,
            machine,
            task,
        }
    }

    async fn run_loop(self, shutdown: CancellationToken) {
        let name = self.job.name().to_string();
        info!(driver = %name, trigger = %self.trigger, "Driver started");

        let mut scheduled = self.trigger.first(Instant::now(), &self.clock);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep_until(scheduled) => {}
            }

            let now = Instant::now();
            let decision = lock(&self.machine).on_trigger(scheduled, now);
            match decision {
                TriggerDecision::Start { run_id } => {
                    info!(driver = %name, run_id, "Run started");
                    in_flight = Some(self.start_run(run_id, shutdown.child_token()));
                }
                TriggerDecision::Skipped(reason) => {
                    warn!(driver = %name, %reason, "Trigger skipped");
                }
            }

            scheduled = self.trigger.after(scheduled, now, &self.clock);
        }

        if let Some(run) = in_flight {
            if !run.is_finished() {
                info!(driver = %name, "Waiting for in-flight run to stop");
            }
            let _ = run.await;
        }
        let stats = lock(&self.machine).stats();
        info!(
            driver = %name,
            started = stats.started,
            succeeded = stats.succeeded,
            failed = stats.failed,
            skipped_running = stats.skipped_running,
            skipped_misfire = stats.skipped_misfire,
            "Driver stopped"
        );
    }

    /// Spawn the job and a supervisor that reports its outcome
    fn start_run(&self, run_id: u64, cancel: CancellationToken) -> JoinHandle<()> {
        let job = Arc::clone(&self.job);
        let machine = Arc::clone(&self.machine);
        let name = job.name().to_string();
        let started = Instant::now();

        let run = tokio::spawn(async move { job.run(cancel).await });

        tokio::spawn(async move {
            let outcome = match run.await {
                Ok(Ok(())) => {
                    info!(
                        driver = %name,
                        run_id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Run finished"
                    );
                    RunOutcome::Succeeded
                }
                Ok(Err(e)) => {
                    let chain = format!("{:#}", e);
                    error!(driver = %name, run_id, error = %chain, "Run failed");
                    RunOutcome::Failed
                }
                Err(e) if e.is_panic() => {
                    error!(driver = %name, run_id, "Run panicked");
                    RunOutcome::Failed
                }
                Err(e) => {
                    error!(driver = %name, run_id, error = %e, "Run aborted");
                    RunOutcome::Failed
                }
            };
            lock(&machine).on_finished(run_id, outcome);
        })
    }
}

/// Running driver
pub struct DriverHandle {
    name: String,
    machine: Arc<Mutex<DriverStateMachine>>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> DriverStats {
        lock(&self.machine).stats()
    }

    pub fn state(&self) -> DriverState {
        lock(&self.machine).state()
    }

    /// Wait for the loop (and any in-flight run) to stop
    pub async fn join(self) -> DriverStats {
        if let Err(e) = self.task.await {
            error!(driver = %self.name, error = %e, "Driver task ended abnormally");
        }
        lock(&self.machine).stats()
    }
}
