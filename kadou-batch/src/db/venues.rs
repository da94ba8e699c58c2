//! Venue directory operations
//!
//! Venues are created and edited by import and never deleted; taking a
//! venue out of rotation clears `in_scope`.

use kadou_common::models::{LayoutProfile, Venue, VenueCategory};
use kadou_common::time::ClockTime;
use kadou_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const VENUE_COLUMNS: &str = "venue_id, name, area, prefecture, category, capacity, \
                             open_time, close_time, layout, schedule_url, in_scope";

fn parse_clock(value: Option<String>, venue_id: i64, column: &str) -> Result<Option<ClockTime>> {
    value
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.parse::<ClockTime>().map_err(|e| {
                Error::InvalidInput(format!("Venue {} has invalid {}: {}", venue_id, column, e))
            })
        })
        .transpose()
}

fn venue_from_row(row: &SqliteRow) -> Result<Venue> {
    let id: i64 = row.get("venue_id");
    let layout: String = row.get("layout");
    let layout = layout
        .parse::<LayoutProfile>()
        .map_err(|e| Error::InvalidInput(format!("Venue {}: {}", id, e)))?;
    let category: String = row.get("category");
    let capacity: Option<i64> = row.get("capacity");

    Ok(Venue {
        id,
        name: row.get("name"),
        area: row.get("area"),
        prefecture: row.get("prefecture"),
        category: VenueCategory::from_stored(&category),
        capacity: capacity.and_then(|c| u32::try_from(c).ok()),
        open_time: parse_clock(row.get("open_time"), id, "open_time")?,
        close_time: parse_clock(row.get("close_time"), id, "close_time")?,
        layout,
        schedule_url: row.get("schedule_url"),
        in_scope: row.get::<i64, _>("in_scope") != 0,
    })
}

/// A stored venue row that does not parse
#[derive(Debug)]
pub struct InvalidVenue {
    pub venue_id: i64,
    pub error: Error,
}

/// One venue row, parsed or not
pub type LoadedVenue = std::result::Result<Venue, InvalidVenue>;

fn load_row(row: &SqliteRow) -> LoadedVenue {
    venue_from_row(row).map_err(|error| InvalidVenue {
        venue_id: row.get("venue_id"),
        error,
    })
}

/// Parsed venues only; rows that do not parse are logged and left out
fn keep_valid(loaded: Vec<LoadedVenue>) -> Vec<Venue> {
    loaded
        .into_iter()
        .filter_map(|v| match v {
            Ok(venue) => Some(venue),
            Err(bad) => {
                tracing::warn!(venue_id = bad.venue_id, error = %bad.error, "Skipping unreadable venue row");
                None
            }
        })
        .collect()
}

/// All venues, in-scope or not, ordered by id
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Venue>> {
    let rows = sqlx::query(&format!("SELECT {} FROM venues ORDER BY venue_id", VENUE_COLUMNS))
        .fetch_all(pool)
        .await?;
    Ok(keep_valid(rows.iter().map(load_row).collect()))
}

/// Every in-scope row, each parsed on its own
///
/// A malformed row comes back as an [`InvalidVenue`] so the caller can
/// skip that venue and carry on with the rest.
pub async fn load_in_scope(pool: &SqlitePool) -> Result<Vec<LoadedVenue>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM venues WHERE in_scope = 1 ORDER BY venue_id",
        VENUE_COLUMNS
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(load_row).collect())
}

/// One venue row, parsed on its own; `None` if the id is unknown
pub async fn load(pool: &SqlitePool, venue_id: i64) -> Result<Option<LoadedVenue>> {
    let row = sqlx::query(&format!("SELECT {} FROM venues WHERE venue_id = ?", VENUE_COLUMNS))
        .bind(venue_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(load_row))
}

pub async fn get(pool: &SqlitePool, venue_id: i64) -> Result<Option<Venue>> {
    load(pool, venue_id)
        .await?
        .transpose()
        .map_err(|bad| bad.error)
}

/// Like [`get`], but an unknown id is [`Error::NotFound`]
pub async fn require(pool: &SqlitePool, venue_id: i64) -> Result<Venue> {
    get(pool, venue_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Venue {}", venue_id)))
}

/// Insert or update a venue by id
pub async fn upsert(pool: &SqlitePool, venue: &Venue) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO venues (
            venue_id, name, area, prefecture, category, capacity,
            open_time, close_time, layout, schedule_url, in_scope
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(venue_id) DO UPDATE SET
            name = excluded.name,
            area = excluded.area,
            prefecture = excluded.prefecture,
            category = excluded.category,
            capacity = excluded.capacity,
            open_time = excluded.open_time,
            close_time = excluded.close_time,
            layout = excluded.layout,
            schedule_url = excluded.schedule_url,
            in_scope = excluded.in_scope
        "#,
    )
    .bind(venue.id)
    .bind(&venue.name)
    .bind(&venue.area)
    .bind(&venue.prefecture)
    .bind(venue.category.as_str())
    .bind(venue.capacity.map(i64::from))
    .bind(venue.open_time.map(|t| t.to_string()))
    .bind(venue.close_time.map(|t| t.to_string()))
    .bind(venue.layout.as_str())
    .bind(&venue.schedule_url)
    .bind(venue.in_scope as i64)
    .execute(pool)
    .await?;

    Ok(())
}

/// Take a venue out of rotation; returns false if the id is unknown
pub async fn deactivate(pool: &SqlitePool, venue_id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE venues SET in_scope = 0 WHERE venue_id = ?")
        .bind(venue_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kadou_common::db::init_memory_pool;

    fn sample(id: i64) -> Venue {
        Venue {
            id,
            name: format!("Venue {}", id),
            area: Some("Area".to_string()),
            prefecture: None,
            category: VenueCategory::RoomBased,
            capacity: Some(6),
            open_time: Some("20:00".parse().unwrap()),
            close_time: Some("26:00".parse().unwrap()),
            layout: LayoutProfile::Standard,
            schedule_url: format!("http://example.invalid/{}/", id),
            in_scope: true,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let pool = init_memory_pool().await.unwrap();
        let venue = sample(1);
        upsert(&pool, &venue).await.unwrap();
        assert_eq!(get(&pool, 1).await.unwrap(), Some(venue.clone()));

        let mut renamed = venue;
        renamed.name = "Renamed".to_string();
        renamed.capacity = None;
        upsert(&pool, &renamed).await.unwrap();
        assert_eq!(get(&pool, 1).await.unwrap(), Some(renamed));
        assert_eq!(list_all(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deactivate_keeps_row() {
        let pool = init_memory_pool().await.unwrap();
        upsert(&pool, &sample(1)).await.unwrap();
        upsert(&pool, &sample(2)).await.unwrap();

        assert!(deactivate(&pool, 1).await.unwrap());
        assert!(!deactivate(&pool, 99).await.unwrap());

        let in_scope = load_in_scope(&pool).await.unwrap();
        assert_eq!(in_scope.len(), 1);
        assert!(matches!(&in_scope[0], Ok(v) if v.id == 2));
        assert!(!get(&pool, 1).await.unwrap().unwrap().in_scope);
    }

    #[tokio::test]
    async fn test_unknown_stored_layout_is_error() {
        let pool = init_memory_pool().await.unwrap();
        upsert(&pool, &sample(1)).await.unwrap();
        sqlx::query("UPDATE venues SET layout = 'typeZ' WHERE venue_id = 1")
            .execute(&pool)
            .await
            .unwrap();
        assert!(get(&pool, 1).await.is_err());
        assert!(matches!(load(&pool, 1).await.unwrap(), Some(Err(InvalidVenue { venue_id: 1, .. }))));
    }

    #[tokio::test]
    async fn test_bad_row_does_not_hide_other_venues() {
        let pool = init_memory_pool().await.unwrap();
        upsert(&pool, &sample(1)).await.unwrap();
        upsert(&pool, &sample(2)).await.unwrap();
        sqlx::query("UPDATE venues SET open_time = '9pm' WHERE venue_id = 2")
            .execute(&pool)
            .await
            .unwrap();

        let loaded = load_in_scope(&pool).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(matches!(&loaded[0], Ok(v) if v.id == 1));
        assert!(matches!(&loaded[1], Err(bad) if bad.venue_id == 2));
        assert_eq!(list_all(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_require_unknown_is_not_found() {
        let pool = init_memory_pool().await.unwrap();
        upsert(&pool, &sample(1)).await.unwrap();
        assert_eq!(require(&pool, 1).await.unwrap().id, 1);
        assert!(matches!(require(&pool, 404).await, Err(Error::NotFound(_))));
    }
}
