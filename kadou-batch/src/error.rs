//! Error types for kadou-batch
//!
//! Each stage has its own enum so callers can tell a blocked fetch from a
//! misconfigured venue without string matching. All of them are
//! per-venue: the orchestrator and aggregator log and isolate them.

use thiserror::Error;

use kadou_common::models::LayoutProfile;

/// Failure of a single page fetch
#[derive(Debug, Error)]
pub enum TransportError {
    /// Site answered with a rate-limit or overload status
    #[error("Rate limited: HTTP {status}")]
    RateLimited { status: u16 },

    /// Site rejected the request even after a session rotation
    #[error("Access denied: HTTP {status}")]
    AccessDenied { status: u16 },

    /// Request did not complete within the transport timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Connection failure, unreadable body or unexpected status
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Attempt budget used up; carries the last failure
    #[error("Gave up after {attempts} attempts: {last}")]
    ExhaustedRetries {
        attempts: u32,
        last: Box<TransportError>,
    },
}

impl TransportError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else {
            TransportError::NetworkError(err.to_string())
        }
    }
}

/// No classifier is registered for a layout profile
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Layout profile '{0}' is not supported")]
pub struct UnsupportedLayout(pub LayoutProfile);

/// Per-venue collection failure
#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Unsupported(#[from] UnsupportedLayout),

    /// Held page missing or unreadable
    #[error("Held page error: {0}")]
    HeldPage(String),

    #[error("Common error: {0}")]
    Common(#[from] kadou_common::Error),
}

/// Per-venue aggregation failure
#[derive(Debug, Error)]
pub enum AggregationError {
    /// Venue lacks something aggregation needs (e.g. operating hours)
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Venue not found: {0}")]
    VenueNotFound(i64),

    #[error("Database error: {0}")]
    Database(#[from] kadou_common::Error),
}
