//! Where page snapshots come from
//!
//! Live pages are fetched through the transport and stamped with the
//! site clock when the response arrives. Held pages are files saved for
//! manual review; their capture time is the file's modification time.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kadou_common::models::Venue;
use kadou_common::time::SiteClock;

use crate::error::CollectError;
use crate::fetch::FetchTransport;

/// One page snapshot ready for classification
#[derive(Debug, Clone)]
pub struct CapturedPage {
    pub content: String,
    pub captured_at: NaiveDateTime,
    /// URL or file path the content came from
    pub origin: String,
}

/// Produces the current page snapshot for a venue
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn capture(&self, venue: &Venue) -> Result<CapturedPage, CollectError>;
}

/// Fetches venue schedule pages over HTTP
pub struct LivePageSource {
    transport: Arc<FetchTransport>,
    clock: SiteClock,
}

impl LivePageSource {
    pub fn new(transport: Arc<FetchTransport>, clock: SiteClock) -> Self {
        Self { transport, clock }
    }

    /// Fetch an arbitrary URL (inspection of unregistered venues)
    pub async fn capture_url(&self, url: &str) -> Result<CapturedPage, CollectError> {
        let page = self.transport.fetch(url).await?;
        Ok(CapturedPage {
            content: page.body,
            captured_at: self.clock.now(),
            origin: page.url,
        })
    }
}

#[async_trait]
impl PageSource for LivePageSource {
    async fn capture(&self, venue: &Venue) -> Result<CapturedPage, CollectError> {
        self.capture_url(&venue.schedule_url).await
    }
}

/// Reads held pages from a directory
pub struct HeldPageSource {
    dir: PathBuf,
    clock: SiteClock,
}

impl HeldPageSource {
    pub fn new(dir: impl Into<PathBuf>, clock: SiteClock) -> Self {
        Self {
            dir: dir.into(),
            clock,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load one held page file
    pub async fn load_file(&self, path: &Path) -> Result<CapturedPage, CollectError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| CollectError::HeldPage(format!("{}: {}", path.display(), e)))?;
        let modified = metadata
            .modified()
            .map_err(|e| CollectError::HeldPage(format!("{}: {}", path.display(), e)))?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CollectError::HeldPage(format!("{}: {}", path.display(), e)))?;

        Ok(CapturedPage {
            content: String::from_utf8_lossy(&bytes).into_owned(),
            captured_at: self.clock.from_system_time(modified),
            origin: path.display().to_string(),
        })
    }

    /// Newest `<venue_id>*.html` in the held pages directory
    ///
    /// The character after the id must not be a digit, so venue 1 does
    /// not pick up venue 12's pages.
    pub async fn newest_for_venue(&self, venue_id: i64) -> Result<PathBuf, CollectError> {
        let prefix = venue_id.to_string();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| CollectError::HeldPage(format!("{}: {}", self.dir.display(), e)))?;

        let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CollectError::HeldPage(format!("{}: {}", self.dir.display(), e)))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            if !name.ends_with(".html") || rest.starts_with(|c: char| c.is_ascii_digit()) {
                continue;
            }
            let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
                continue;
            };
            if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
                newest = Some((modified, entry.path()));
            }
        }

        newest.map(|(_, path)| path).ok_or_else(|| {
            CollectError::HeldPage(format!(
                "No held page for venue {} in {}",
                venue_id,
                self.dir.display()
            ))
        })
    }
}

#[async_trait]
impl PageSource for HeldPageSource {
    async fn capture(&self, venue: &Venue) -> Result<CapturedPage, CollectError> {
        let path = self.newest_for_venue(venue.id).await?;
        self.load_file(&path).await
    }
}
