//! Inspection mode
//!
//! Classify a page for a candidate venue without registering it or
//! writing anything: a raw URL, a held page file, or the newest held
//! page of a registered venue. The report carries the extracted text
//! fragments per worker and a capacity-correction preview.

use chrono::NaiveDateTime;
use std::fmt;
use std::path::PathBuf;

use kadou_common::models::{capacity_ceiling, LayoutProfile, Venue, VenueCategory};
use kadou_common::time::format_timestamp;

use crate::aggregator::{compute_working_rate, RateComputation};
use crate::classifier::{Classification, LayoutRegistry};
use crate::error::CollectError;

use super::source::{CapturedPage, HeldPageSource, LivePageSource};

/// What to inspect
#[derive(Debug, Clone)]
pub enum InspectTarget {
    Url(String),
    HeldPage(PathBuf),
    /// Newest held page of a registered venue
    Venue(Venue),
}

#[derive(Debug, Clone)]
pub struct InspectionRequest {
    pub target: InspectTarget,
    /// Overrides the venue's layout; `standard` when neither is given
    pub layout: Option<LayoutProfile>,
    pub category: Option<VenueCategory>,
    pub capacity: Option<u32>,
}

impl InspectionRequest {
    pub fn new(target: InspectTarget) -> Self {
        Self {
            target,
            layout: None,
            category: None,
            capacity: None,
        }
    }

    fn venue(&self) -> Option<&Venue> {
        match &self.target {
            InspectTarget::Venue(v) => Some(v),
            _ => None,
        }
    }

    fn resolved_layout(&self) -> LayoutProfile {
        self.layout
            .or_else(|| self.venue().map(|v| v.layout))
            .unwrap_or_default()
    }

    fn resolved_category(&self) -> VenueCategory {
        self.category
            .or_else(|| self.venue().map(|v| v.category))
            .unwrap_or_default()
    }

    fn resolved_capacity(&self) -> Option<u32> {
        self.capacity.or_else(|| self.venue().and_then(|v| v.capacity))
    }
}

/// Raw versus capacity-corrected rate for one snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityPreview {
    pub category: VenueCategory,
    pub capacity: Option<u32>,
    pub computation: RateComputation,
    pub raw_rate: Option<f64>,
    pub corrected_rate: Option<f64>,
}

impl CapacityPreview {
    pub fn new(classification: &Classification, category: VenueCategory, capacity: Option<u32>) -> Self {
        let observations: Vec<(bool, bool)> = classification
            .workers
            .iter()
            .map(|w| (w.on_shift, w.working))
            .collect();
        let raw = compute_working_rate(observations.iter().copied(), None);
        let computation = compute_working_rate(observations, capacity_ceiling(category, capacity));
        Self {
            category,
            capacity,
            computation,
            raw_rate: raw.percentage(),
            corrected_rate: computation.percentage(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InspectionReport {
    pub origin: String,
    pub captured_at: NaiveDateTime,
    pub layout: LayoutProfile,
    pub classification: Classification,
    pub preview: CapacityPreview,
}

fn percent(rate: Option<f64>) -> String {
    rate.map_or_else(|| "n/a".to_string(), |p| format!("{:.2}%", p))
}

impl fmt::Display for InspectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.classification;
        let p = &self.preview;
        writeln!(f, "Source:      {}", self.origin)?;
        writeln!(f, "Captured at: {}", format_timestamp(self.captured_at))?;
        writeln!(f, "Layout:      {}", self.layout)?;
        writeln!(
            f,
            "Blocks:      {} wrappers, {} qualifying, {} without worker id",
            c.diagnostics.wrapper_blocks, c.diagnostics.qualifying_blocks, c.diagnostics.missing_worker_id
        )?;
        if let Some(degradation) = c.diagnostics.degraded {
            writeln!(f, "WARNING:     {}", degradation)?;
        }
        writeln!(f, "Workers:     {}", c.workers.len())?;
        writeln!(f, "On shift:    {}", p.computation.on_shift)?;
        writeln!(f, "Working:     {}", p.computation.working)?;
        writeln!(f, "Raw rate:    {}", percent(p.raw_rate))?;
        match p.computation.ceiling {
            Some(cap) => {
                writeln!(
                    f,
                    "Capacity:    {} ({}), working counted {}{}",
                    cap,
                    p.category,
                    p.computation.counted_working,
                    if p.computation.was_clamped() { " (clamped)" } else { "" }
                )?;
                writeln!(f, "Corrected:   {}", percent(p.corrected_rate))?;
            }
            None => writeln!(f, "Capacity:    none applies ({})", p.category)?,
        }

        for (status, detail) in c.workers.iter().zip(&c.details) {
            writeln!(
                f,
                "  {:>10}  on_shift={:<5} working={:<5} shift={:?} available={:?}{}",
                status.worker_id,
                status.on_shift,
                status.working,
                detail.shift_texts,
                detail.availability_texts,
                if detail.fully_booked { " [fully booked]" } else { "" }
            )?;
        }
        Ok(())
    }
}

/// Capture and classify without persisting anything
///
/// `live` may be `None` when no network access is wanted; URL targets
/// then fail.
pub async fn inspect(
    registry: &LayoutRegistry,
    live: Option<&LivePageSource>,
    held: &HeldPageSource,
    request: &InspectionRequest,
) -> Result<InspectionReport, CollectError> {
    let layout = request.resolved_layout();
    if !registry.is_supported(layout) {
        return Err(crate::error::UnsupportedLayout(layout).into());
    }

    let page: CapturedPage = match &request.target {
        InspectTarget::Url(url) => match live {
            Some(source) => source.capture_url(url).await?,
            None => {
                return Err(kadou_common::Error::InvalidInput(format!(
                    "URL inspection of {} needs a live page source",
                    url
                ))
                .into())
            }
        },
        InspectTarget::HeldPage(path) => held.load_file(path).await?,
        InspectTarget::Venue(venue) => {
            let path = held.newest_for_venue(venue.id).await?;
            held.load_file(&path).await?
        }
    };

    let classification = registry.classify(&page.content, page.captured_at, layout)?;
    let preview = CapacityPreview::new(
        &classification,
        request.resolved_category(),
        request.resolved_capacity(),
    );

    for (status, detail) in classification.workers.iter().zip(&classification.details) {
        tracing::debug!(
            worker_id = %status.worker_id,
            on_shift = status.on_shift,
            working = status.working,
            shift = ?detail.shift_texts,
            available = ?detail.availability_texts,
            "Inspected worker block"
        );
    }
    tracing::info!(
        origin = %page.origin,
        %layout,
        workers = classification.workers.len(),
        on_shift = preview.computation.on_shift,
        working = preview.computation.working,
        "Inspection finished"
    );

    Ok(InspectionReport {
        origin: page.origin,
        captured_at: page.captured_at,
        layout,
        classification,
        preview,
    })
}
