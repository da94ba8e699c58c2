//! Worker registry
//!
//! Fetches only ever add workers; nothing a fetch sees modifies an
//! existing row. Retirement is an explicit administrative action.

use chrono::NaiveDateTime;
use kadou_common::models::Worker;
use kadou_common::time::{format_timestamp, parse_timestamp};
use kadou_common::Result;
use sqlx::{Row, SqlitePool};

/// A worker as it appeared on a classified page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenWorker {
    pub worker_id: String,
    pub profile_ref: Option<String>,
}

/// Register workers seen in a fetch; returns how many were new
pub async fn register_seen(
    pool: &SqlitePool,
    venue_id: i64,
    seen: &[SeenWorker],
    seen_at: NaiveDateTime,
) -> Result<u64> {
    if seen.is_empty() {
        return Ok(0);
    }

    let first_seen = format_timestamp(seen_at);
    let mut tx = pool.begin().await?;
    let mut inserted = 0;
    for worker in seen {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO workers (venue_id, worker_id, profile_ref, active, first_seen)
            VALUES (?, ?, ?, 1, ?)
            "#,
        )
        .bind(venue_id)
        .bind(&worker.worker_id)
        .bind(&worker.profile_ref)
        .bind(&first_seen)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }
    tx.commit().await?;

    if inserted > 0 {
        tracing::debug!(venue_id, new_workers = inserted, "Registered new workers");
    }
    Ok(inserted)
}

/// Mark a worker inactive; returns false if unknown
pub async fn retire(pool: &SqlitePool, venue_id: i64, worker_id: &str) -> Result<bool> {
    let result = sqlx::query("UPDATE workers SET active = 0 WHERE venue_id = ? AND worker_id = ?")
        .bind(venue_id)
        .bind(worker_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_for_venue(pool: &SqlitePool, venue_id: i64) -> Result<Vec<Worker>> {
    let rows = sqlx::query(
        r#"
        SELECT venue_id, worker_id, profile_ref, active, first_seen
        FROM workers
        WHERE venue_id = ?
        ORDER BY worker_id
        "#,
    )
    .bind(venue_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let first_seen: String = row.get("first_seen");
            Ok(Worker {
                venue_id: row.get("venue_id"),
                worker_id: row.get("worker_id"),
                profile_ref: row.get("profile_ref"),
                active: row.get::<i64, _>("active") != 0,
                first_seen: parse_timestamp(&first_seen)?,
            })
        })
        .collect()
}
