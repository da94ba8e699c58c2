//! Shared fixtures for kadou-batch integration tests
#![allow(dead_code)]

use chrono::NaiveDateTime;
use kadou_common::models::{LayoutProfile, Venue, VenueCategory};
use kadou_common::time::parse_timestamp;

pub fn ts(s: &str) -> NaiveDateTime {
    parse_timestamp(s).expect("valid test timestamp")
}

/// Worker block in the standard layout
pub fn block(worker_id: &str, shift: &str, next_available: &str) -> String {
    format!(
        r#"<div class="sugunavi_wrapper">
  <a href="/shop/sample/girlid-{id}/">Worker {id}</a>
  <p class="shukkin_detail_time">{shift}</p>
  <div class="sugunavibox"><span class="title">{next}</span></div>
</div>"#,
        id = worker_id,
        shift = shift,
        next = next_available
    )
}

/// Worker block whose availability box says fully booked
pub fn booked_block(worker_id: &str, shift: &str) -> String {
    format!(
        r#"<div class="sugunavi_wrapper">
  <a href="/shop/sample/girlid-{id}/">Worker {id}</a>
  <p class="shukkin_detail_time">{shift}</p>
  <div class="sugunavibox"><p>本日の受付終了</p></div>
</div>"#,
        id = worker_id,
        shift = shift
    )
}

/// Wrapper without the availability box
pub fn block_without_box(worker_id: &str, shift: &str) -> String {
    format!(
        r#"<div class="sugunavi_wrapper">
  <a href="/shop/sample/girlid-{id}/">Worker {id}</a>
  <p class="shukkin_detail_time">{shift}</p>
</div>"#,
        id = worker_id,
        shift = shift
    )
}

/// Qualifying block with no worker id link
pub fn block_without_id(shift: &str) -> String {
    format!(
        r#"<div class="sugunavi_wrapper">
  <a href="/shop/sample/">Shop top</a>
  <p class="shukkin_detail_time">{shift}</p>
  <div class="sugunavibox"><span class="title">23:00</span></div>
</div>"#,
        shift = shift
    )
}

pub fn page(blocks: &[String]) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Schedule</title></head><body>\n{}\n</body></html>",
        blocks.join("\n")
    )
}

pub fn venue(id: i64) -> Venue {
    Venue {
        id,
        name: format!("Venue {}", id),
        area: Some("Test Area".into()),
        prefecture: Some("Tokyo".into()),
        category: VenueCategory::Dispatch,
        capacity: None,
        open_time: Some("18:00".parse().expect("valid time")),
        close_time: Some("05:00".parse().expect("valid time")),
        layout: LayoutProfile::Standard,
        schedule_url: format!("http://127.0.0.1:9/venue/{}", id),
        in_scope: true,
    }
}
