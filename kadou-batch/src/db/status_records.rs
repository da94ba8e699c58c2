//! Append-only status record store

use kadou_common::models::StatusRecord;
use kadou_common::time::{format_timestamp, parse_timestamp, OperatingWindow};
use kadou_common::Result;
use sqlx::{Row, SqlitePool};

use crate::utils::retry_on_lock;

/// Append one fetch's records in a single transaction
///
/// Retries the whole batch on lock contention; a batch is either fully
/// written or not at all.
pub async fn append_batch(
    pool: &SqlitePool,
    records: &[StatusRecord],
    max_wait_ms: u64,
) -> Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }

    // Prepare all data BEFORE acquiring a connection
    let rows: Vec<(i64, &str, i64, i64, String)> = records
        .iter()
        .map(|r| {
            (
                r.venue_id,
                r.worker_id.as_str(),
                r.on_shift as i64,
                r.working as i64,
                format_timestamp(r.captured_at),
            )
        })
        .collect();

    let rows = &rows;
    retry_on_lock("append_status_records", max_wait_ms, || async move {
        let mut tx = pool.begin().await?;
        for (venue_id, worker_id, on_shift, working, captured_at) in rows {
            sqlx::query(
                r#"
                INSERT INTO status_records (venue_id, worker_id, on_shift, working, captured_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(*venue_id)
            .bind(*worker_id)
            .bind(*on_shift)
            .bind(*working)
            .bind(captured_at.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    })
    .await
}

/// Records for a venue captured inside `[window.start, window.end]`
pub async fn select_in_window(
    pool: &SqlitePool,
    venue_id: i64,
    window: &OperatingWindow,
) -> Result<Vec<StatusRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT venue_id, worker_id, on_shift, working, captured_at
        FROM status_records
        WHERE venue_id = ? AND captured_at >= ? AND captured_at <= ?
        ORDER BY captured_at, id
        "#,
    )
    .bind(venue_id)
    .bind(format_timestamp(window.start))
    .bind(format_timestamp(window.end))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let captured_at: String = row.get("captured_at");
            Ok(StatusRecord {
                venue_id: row.get("venue_id"),
                worker_id: row.get("worker_id"),
                on_shift: row.get::<i64, _>("on_shift") != 0,
                working: row.get::<i64, _>("working") != 0,
                captured_at: parse_timestamp(&captured_at)?,
            })
        })
        .collect()
}

/// Total records stored for a venue
pub async fn count_for_venue(pool: &SqlitePool, venue_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM status_records WHERE venue_id = ?")
        .bind(venue_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kadou_common::db::init_memory_pool;

    fn record(worker: &str, ts: &str) -> StatusRecord {
        StatusRecord {
            venue_id: 1,
            worker_id: worker.to_string(),
            on_shift: true,
            working: false,
            captured_at: parse_timestamp(ts).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_append_and_select_window_inclusive() {
        let pool = init_memory_pool().await.unwrap();
        let records = vec![
            record("a", "2024-05-01 19:59:59"),
            record("a", "2024-05-01 20:00:00"),
            record("b", "2024-05-02 02:00:00"),
            record("b", "2024-05-02 02:00:01"),
        ];
        assert_eq!(append_batch(&pool, &records, 1000).await.unwrap(), 4);

        let window = OperatingWindow {
            start: parse_timestamp("2024-05-01 20:00:00").unwrap(),
            end: parse_timestamp("2024-05-02 02:00:00").unwrap(),
        };
        let selected = select_in_window(&pool, 1, &window).await.unwrap();
        assert_eq!(selected, records[1..3].to_vec());
        assert!(select_in_window(&pool, 2, &window).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_empty_is_noop() {
        let pool = init_memory_pool().await.unwrap();
        assert_eq!(append_batch(&pool, &[], 1000).await.unwrap(), 0);
        assert_eq!(count_for_venue(&pool, 1).await.unwrap(), 0);
    }
}
