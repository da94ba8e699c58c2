//! Database access for kadou-batch
//!
//! Repositories over the shared SQLite file. Pool creation and schema
//! live in `kadou_common::db`.

pub mod daily_rates;
pub mod status_records;
pub mod venues;
pub mod workers;

pub use kadou_common::db::{init_database_pool, init_memory_pool};
