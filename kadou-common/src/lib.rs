//! # Kadou Common Library
//!
//! Shared code for the occupancy estimator:
//! - Error type and result alias
//! - Bootstrap configuration (TOML) and root folder resolution
//! - Database pool and schema
//! - Domain models (venues, workers, status records, daily rates)
//! - Site-local clock and operating-hours arithmetic

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod models;
pub mod time;

pub use error::{Error, Result};
