//! Classifier for the standard booking-page layout
//!
//! Page structure:
//! - each worker is a `div.sugunavi_wrapper`; only wrappers containing a
//!   `.sugunavibox` availability box count
//! - the worker id is the number in the first `girlid-NNN` link
//! - shift text lives in elements whose class contains `shukkin_detail_time`
//! - next-available times are `.title` elements inside the availability box

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::shift::{is_on_shift, is_working, KeywordRules};
use super::{BlockDetail, Classification, Diagnostics, WorkerStatus};

static WRAPPER: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.sugunavi_wrapper").expect("static wrapper selector is valid")
});
static AVAILABILITY_BOX: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".sugunavibox").expect("static box selector is valid"));
static LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("static link selector is valid"));
static SHIFT_TIME: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[class*="shukkin_detail_time"]"#).expect("static shift selector is valid")
});
static TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".title").expect("static title selector is valid"));

static WORKER_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"girlid-(\d+)").expect("static worker id pattern is valid"));

static RULES: Lazy<KeywordRules> = Lazy::new(KeywordRules::default);

/// Trimmed text nodes joined without separators
fn stripped_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .concat()
}

/// Worker id and the link it came from
fn worker_id(block: ElementRef<'_>) -> Option<(String, String)> {
    block.select(&LINK).find_map(|link| {
        let href = link.value().attr("href")?;
        let caps = WORKER_ID.captures(href)?;
        Some((caps[1].to_string(), href.to_string()))
    })
}

fn classify_block(
    block: ElementRef<'_>,
    availability: ElementRef<'_>,
    captured_at: NaiveDateTime,
) -> Option<(WorkerStatus, BlockDetail)> {
    let (worker_id, profile_ref) = worker_id(block)?;

    let shift_texts: Vec<String> = block
        .select(&SHIFT_TIME)
        .map(stripped_text)
        .filter(|t| !t.is_empty())
        .collect();
    let availability_texts: Vec<String> = availability
        .select(&TITLE)
        .map(stripped_text)
        .filter(|t| !t.is_empty())
        .collect();
    let availability_text = stripped_text(availability);

    let on_shift = is_on_shift(&shift_texts, captured_at, &RULES);
    let working = is_working(
        on_shift,
        &availability_text,
        &availability_texts,
        captured_at,
        &RULES,
    );

    Some((
        WorkerStatus {
            worker_id: worker_id.clone(),
            on_shift,
            working,
        },
        BlockDetail {
            worker_id,
            profile_ref: Some(profile_ref),
            shift_texts,
            availability_texts,
            fully_booked: RULES.is_fully_booked(&availability_text),
        },
    ))
}

/// Classify a standard-layout page
pub fn classify(content: &str, captured_at: NaiveDateTime) -> Classification {
    let document = Html::parse_document(content);
    let mut diagnostics = Diagnostics::default();
    let mut workers = Vec::new();
    let mut details = Vec::new();

    for block in document.select(&WRAPPER) {
        diagnostics.wrapper_blocks += 1;
        let Some(availability) = block.select(&AVAILABILITY_BOX).next() else {
            continue;
        };
        diagnostics.qualifying_blocks += 1;

        match classify_block(block, availability, captured_at) {
            Some((status, detail)) => {
                workers.push(status);
                details.push(detail);
            }
            None => diagnostics.missing_worker_id += 1,
        }
    }

    diagnostics.assess();
    Classification {
        workers,
        details,
        diagnostics,
    }
}
