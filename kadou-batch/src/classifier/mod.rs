//! Page classification
//!
//! Turns a page snapshot and its capture time into one
//! `(worker, on_shift, working)` triple per listed worker. Classification
//! is pure: no clock reads, no randomness, no I/O. Malformed pages give
//! an empty or partial result with diagnostics, never an error.
//!
//! Layout dispatch is a table keyed by [`LayoutProfile`]. Profiles
//! without a classifier are registered as not supported and classify to
//! [`UnsupportedLayout`].

pub mod shift;
pub mod standard;

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::fmt;

use kadou_common::models::{LayoutProfile, StatusRecord};

use crate::db::workers::SeenWorker;
use crate::error::UnsupportedLayout;

/// Worker count a healthy page is expected to list
pub const EXPECTED_BLOCKS: std::ops::RangeInclusive<usize> = 1..=50;

/// One worker's classified state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub on_shift: bool,
    pub working: bool,
}

/// Text fragments a block was classified from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDetail {
    pub worker_id: String,
    pub profile_ref: Option<String>,
    pub shift_texts: Vec<String>,
    pub availability_texts: Vec<String>,
    pub fully_booked: bool,
}

/// Why a result is suspect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degradation {
    /// No qualifying worker blocks at all
    NoBlocks,
    /// Qualifying block count outside [`EXPECTED_BLOCKS`]
    CountOutOfRange { found: usize },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::NoBlocks => write!(f, "no worker blocks found"),
            Degradation::CountOutOfRange { found } => write!(
                f,
                "{} worker blocks, expected {}..={}",
                found,
                EXPECTED_BLOCKS.start(),
                EXPECTED_BLOCKS.end()
            ),
        }
    }
}

/// Structural counts gathered while classifying
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Blocks matching the outer structural marker
    pub wrapper_blocks: usize,
    /// Blocks that also carry the required sub-marker
    pub qualifying_blocks: usize,
    /// Qualifying blocks dropped for lack of a worker id
    pub missing_worker_id: usize,
    pub degraded: Option<Degradation>,
}

impl Diagnostics {
    /// Set `degraded` from the qualifying block count
    pub fn assess(&mut self) {
        self.degraded = if self.qualifying_blocks == 0 {
            Some(Degradation::NoBlocks)
        } else if !EXPECTED_BLOCKS.contains(&self.qualifying_blocks) {
            Some(Degradation::CountOutOfRange {
                found: self.qualifying_blocks,
            })
        } else {
            None
        };
    }
}

/// Result of classifying one page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub workers: Vec<WorkerStatus>,
    pub details: Vec<BlockDetail>,
    pub diagnostics: Diagnostics,
}

impl Classification {
    pub fn on_shift_count(&self) -> usize {
        self.workers.iter().filter(|w| w.on_shift).count()
    }

    pub fn working_count(&self) -> usize {
        self.workers.iter().filter(|w| w.on_shift && w.working).count()
    }

    /// Status records for persistence, one per worker
    pub fn to_records(&self, venue_id: i64, captured_at: NaiveDateTime) -> Vec<StatusRecord> {
        self.workers
            .iter()
            .map(|w| StatusRecord {
                venue_id,
                worker_id: w.worker_id.clone(),
                on_shift: w.on_shift,
                working: w.working,
                captured_at,
            })
            .collect()
    }

    /// Workers to register in the worker registry
    pub fn seen_workers(&self) -> Vec<SeenWorker> {
        self.details
            .iter()
            .map(|d| SeenWorker {
                worker_id: d.worker_id.clone(),
                profile_ref: d.profile_ref.clone(),
            })
            .collect()
    }
}

/// Classifier for one layout
pub type ClassifierFn = fn(&str, NaiveDateTime) -> Classification;

/// Registry entry
#[derive(Clone, Copy)]
pub enum LayoutEntry {
    Supported(ClassifierFn),
    NotSupported,
}

impl fmt::Debug for LayoutEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutEntry::Supported(_) => f.write_str("Supported"),
            LayoutEntry::NotSupported => f.write_str("NotSupported"),
        }
    }
}

/// Layout profile → classifier table
#[derive(Debug, Clone)]
pub struct LayoutRegistry {
    entries: HashMap<LayoutProfile, LayoutEntry>,
}

impl LayoutRegistry {
    /// Empty registry; every profile classifies to `UnsupportedLayout`
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registry with the built-in classifiers
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(
            LayoutProfile::Standard,
            LayoutEntry::Supported(standard::classify),
        );
        for profile in [
            LayoutProfile::AltShift,
            LayoutProfile::AltAvailability,
            LayoutProfile::RosterB,
            LayoutProfile::RosterC,
        ] {
            registry.register(profile, LayoutEntry::NotSupported);
        }
        registry
    }

    pub fn register(&mut self, profile: LayoutProfile, entry: LayoutEntry) {
        self.entries.insert(profile, entry);
    }

    pub fn is_supported(&self, profile: LayoutProfile) -> bool {
        matches!(self.entries.get(&profile), Some(LayoutEntry::Supported(_)))
    }

    /// `(profile, supported)` for every registered profile, in profile order
    pub fn table(&self) -> Vec<(LayoutProfile, bool)> {
        LayoutProfile::ALL
            .into_iter()
            .filter(|p| self.entries.contains_key(p))
            .map(|p| (p, self.is_supported(p)))
            .collect()
    }

    /// Classify `content` captured at `captured_at` using `profile`'s classifier
    pub fn classify(
        &self,
        content: &str,
        captured_at: NaiveDateTime,
        profile: LayoutProfile,
    ) -> Result<Classification, UnsupportedLayout> {
        match self.entries.get(&profile) {
            Some(LayoutEntry::Supported(classifier)) => Ok(classifier(content, captured_at)),
            _ => Err(UnsupportedLayout(profile)),
        }
    }
}

impl Default for LayoutRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
