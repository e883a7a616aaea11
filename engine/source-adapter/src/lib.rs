//! # Source Adapter
//!
//! One adapter per upstream feed. Each adapter follows the simulated clock,
//! resolves every tick against its dataset table and forwards the result to
//! the aggregator, matched or not.
//!
//! A miss never stops the feed: depending on [`MissPolicy`] the adapter either
//! holds the last matched value or falls back to a configured value, and it
//! logs the miss at warning level.

mod adapter;
mod config;
mod error;
mod source;
mod stats;

pub use adapter::{ResolvedValue, SourceAdapter};
pub use config::{AdapterConfig, MissPolicy, SourceKind};
pub use error::AdapterError;
pub use source::ClockSource;
pub use stats::{AdapterStats, StatsCollector};
