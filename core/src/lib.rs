//! Raw-material intake volume engine.
//!
//! Sums size-bucket intake records into a derived `total_volume` record per
//! reporting period, keeps derived fields consistent and bounds how many
//! period rows each cadence may hold.

pub mod aggregator;
pub mod capacity;
pub mod config;
pub mod derived;
pub mod engine;
pub mod error;
pub mod period;
pub mod reconciler;
pub mod record;
pub mod sample;
pub mod store;
pub mod types;
