//! Table definitions
//!
//! Timestamps are site-local `YYYY-MM-DD HH:MM:SS` text and dates are
//! `YYYY-MM-DD` text, so range predicates work as plain string compares.

use sqlx::SqlitePool;

use crate::Result;

const CREATE_VENUES: &str = r#"
    CREATE TABLE IF NOT EXISTS venues (
        venue_id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        area TEXT,
        prefecture TEXT,
        category TEXT NOT NULL DEFAULT 'other',
        capacity INTEGER,
        open_time TEXT,
        close_time TEXT,
        layout TEXT NOT NULL DEFAULT 'standard',
        schedule_url TEXT NOT NULL,
        in_scope INTEGER NOT NULL DEFAULT 1
    )
"#;

const CREATE_WORKERS: &str = r#"
    CREATE TABLE IF NOT EXISTS workers (
        venue_id INTEGER NOT NULL,
        worker_id TEXT NOT NULL,
        profile_ref TEXT,
        active INTEGER NOT NULL DEFAULT 1,
        first_seen TEXT NOT NULL,
        PRIMARY KEY (venue_id, worker_id)
    )
"#;

const CREATE_STATUS_RECORDS: &str = r#"
    CREATE TABLE IF NOT EXISTS status_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        venue_id INTEGER NOT NULL,
        worker_id TEXT NOT NULL,
        on_shift INTEGER NOT NULL,
        working INTEGER NOT NULL,
        captured_at TEXT NOT NULL
    )
"#;

const CREATE_STATUS_RECORDS_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_status_records_venue_captured
        ON status_records (venue_id, captured_at)
"#;

const CREATE_DAILY_RATES: &str = r#"
    CREATE TABLE IF NOT EXISTS daily_rates (
        venue_id INTEGER NOT NULL,
        business_date TEXT NOT NULL,
        working_rate REAL,
        sample_count INTEGER NOT NULL DEFAULT 0,
        computed_at TEXT NOT NULL,
        PRIMARY KEY (venue_id, business_date)
    )
"#;

/// Create all tables and indexes if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    for statement in [
        CREATE_VENUES,
        CREATE_WORKERS,
        CREATE_STATUS_RECORDS,
        CREATE_STATUS_RECORDS_INDEX,
        CREATE_DAILY_RATES,
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database tables initialized (venues, workers, status_records, daily_rates)");

    Ok(())
}
