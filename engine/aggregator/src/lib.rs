//! # Aggregator
//!
//! Fans in one resolved value per registered source for each virtual
//! timestamp and replaces the consolidated record once every source has
//! reported. The alert flag is derived from rainfall and discharge of that
//! same timestamp, never from values of different ticks.
//!
//! A source that misses the synchronization deadline does not block the
//! pipeline: the round is dropped, the previous record stays current and a
//! lag warning is logged.

mod aggregator;
mod config;
mod error;
mod record;
mod round;

pub use aggregator::{Aggregator, AggregatorStats};
pub use config::{AggregatorConfig, AlertThresholds};
pub use error::AggregatorError;
pub use record::{evaluate_alert, ConsolidatedRecord};

/// Default rainfall alert threshold in mm/h
pub const DEFAULT_RAINFALL_THRESHOLD: f64 = 50.0;

/// Default discharge alert threshold in m³/s
pub const DEFAULT_DISCHARGE_THRESHOLD: f64 = 150.0;

/// Default time a round waits for its slowest source
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 800;

#[cfg(test)]
mod tests;
