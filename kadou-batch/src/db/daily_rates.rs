//! Daily rate history
//!
//! One row per (venue, business date). Recomputing replaces the row.

use chrono::NaiveDate;
use kadou_common::models::DailyRate;
use kadou_common::time::{format_date, format_timestamp, parse_date, parse_timestamp};
use kadou_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::utils::retry_on_lock;

fn rate_from_row(row: &SqliteRow) -> Result<DailyRate> {
    let business_date: String = row.get("business_date");
    let computed_at: String = row.get("computed_at");
    Ok(DailyRate {
        venue_id: row.get("venue_id"),
        business_date: parse_date(&business_date)?,
        working_rate: row.get("working_rate"),
        sample_count: row.get("sample_count"),
        computed_at: parse_timestamp(&computed_at)?,
    })
}

/// Insert or replace the rate for `(venue_id, business_date)`
pub async fn upsert(pool: &SqlitePool, rate: &DailyRate, max_wait_ms: u64) -> Result<()> {
    let business_date = format_date(rate.business_date);
    let computed_at = format_timestamp(rate.computed_at);

    retry_on_lock("upsert_daily_rate", max_wait_ms, || {
        let business_date = business_date.as_str();
        let computed_at = computed_at.as_str();
        async move {
            sqlx::query(
                r#"
                INSERT INTO daily_rates (venue_id, business_date, working_rate, sample_count, computed_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(venue_id, business_date) DO UPDATE SET
                    working_rate = excluded.working_rate,
                    sample_count = excluded.sample_count,
                    computed_at = excluded.computed_at
                "#,
            )
            .bind(rate.venue_id)
            .bind(business_date)
            .bind(rate.working_rate)
            .bind(rate.sample_count)
            .bind(computed_at)
            .execute(pool)
            .await?;
            Ok(())
        }
    })
    .await
}

pub async fn get(pool: &SqlitePool, venue_id: i64, date: NaiveDate) -> Result<Option<DailyRate>> {
    let row = sqlx::query(
        r#"
        SELECT venue_id, business_date, working_rate, sample_count, computed_at
        FROM daily_rates
        WHERE venue_id = ? AND business_date = ?
        "#,
    )
    .bind(venue_id)
    .bind(format_date(date))
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(rate_from_row).transpose()
}

pub async fn exists(pool: &SqlitePool, venue_id: i64, date: NaiveDate) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM daily_rates WHERE venue_id = ? AND business_date = ?",
    )
    .bind(venue_id)
    .bind(format_date(date))
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Rates for a venue dated `from` or later, newest first
pub async fn since(pool: &SqlitePool, venue_id: i64, from: NaiveDate) -> Result<Vec<DailyRate>> {
    let rows = sqlx::query(
        r#"
        SELECT venue_id, business_date, working_rate, sample_count, computed_at
        FROM daily_rates
        WHERE venue_id = ? AND business_date >= ?
        ORDER BY business_date DESC
        "#,
    )
    .bind(venue_id)
    .bind(format_date(from))
    .fetch_all(pool)
    .await?;
    rows.iter().map(rate_from_row).collect()
}
