//! kadou-batch library interface
//!
//! Collection, classification and aggregation for the occupancy
//! estimator. The binary in `main.rs` wires these together; the
//! integration tests drive them directly.

pub mod aggregator;
pub mod classifier;
pub mod db;
pub mod error;
pub mod fetch;
pub mod orchestrator;
pub mod scheduler;
pub mod utils;

pub use crate::error::{AggregationError, CollectError, TransportError, UnsupportedLayout};
