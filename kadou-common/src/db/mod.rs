//! Database pool and schema
//!
//! One SQLite file in the root folder holds the venue directory, the
//! worker registry, the append-only status records and the daily rates.

pub mod schema;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

use crate::Result;

/// Open (creating if needed) the database file and ensure the schema
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    schema::init_tables(&pool).await?;

    Ok(pool)
}

/// Private in-memory database with the schema applied
///
/// Limited to a single connection: each SQLite `:memory:` connection is
/// its own database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    schema::init_tables(&pool).await?;
    Ok(pool)
}
