//! Per-driver run state
//!
//! `Idle → Running → Idle`. A trigger that fires while `Running` is
//! skipped, not queued; a trigger handled later than the misfire grace
//! is skipped too. Nothing here reads a clock: callers pass instants in.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Running { run_id: u64, started_at: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning { run_id: u64 },
    Misfired { late_by: Duration },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyRunning { run_id } => write!(f, "run {} still in progress", run_id),
            SkipReason::Misfired { late_by } => write!(f, "misfired, {}s late", late_by.as_secs()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    Start { run_id: u64 },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed,
}

/// Counters since the driver started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped_running: u64,
    pub skipped_misfire: u64,
}

#[derive(Debug)]
pub struct DriverStateMachine {
    state: DriverState,
    stats: DriverStats,
    next_run_id: u64,
    misfire_grace: Duration,
}

impl DriverStateMachine {
    pub fn new(misfire_grace: Duration) -> Self {
        Self {
            state: DriverState::Idle,
            stats: DriverStats::default(),
            next_run_id: 1,
            misfire_grace,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    /// A trigger scheduled for `scheduled_at` is being handled at `now`
    pub fn on_trigger(&mut self, scheduled_at: Instant, now: Instant) -> TriggerDecision {
        if let DriverState::Running { run_id, .. } = self.state {
            self.stats.skipped_running += 1;
            return TriggerDecision::Skipped(SkipReason::AlreadyRunning { run_id });
        }

        let late_by = now.saturating_duration_since(scheduled_at);
        if late_by > self.misfire_grace {
            self.stats.skipped_misfire += 1;
            return TriggerDecision::Skipped(SkipReason::Misfired { late_by });
        }

        let run_id = self.next_run_id;
        self.next_run_id += 1;
        self.stats.started += 1;
        self.state = DriverState::Running {
            run_id,
            started_at: now,
        };
        TriggerDecision::Start { run_id }
    }

    /// Run `run_id` ended; stale ids are ignored
    pub fn on_finished(&mut self, run_id: u64, outcome: RunOutcome) -> bool {
        match self.state {
            DriverState::Running { run_id: current, .. } if current == run_id => {
                self.state = DriverState::Idle;
                match outcome {
                    RunOutcome::Succeeded => self.stats.succeeded += 1,
                    RunOutcome::Failed => self.stats.failed += 1,
                }
                true
            }
            _ => false,
        }
    }
}
