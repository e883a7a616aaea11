//! # SimulationClock
//!
//! The heartbeat of the replay pipeline. On every real-time tick the clock
//! advances a virtual timestamp by a fixed simulated step and hands the new
//! value to every subscriber before the next tick is scheduled.
//!
//! Sensor adapters subscribe to the clock to know which historical row to
//! replay; the aggregator subscribes to know which timestamp it is waiting on.

pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;

#[cfg(test)]
mod tests;


pub use clock::{ClockHandle, ClockSubscription, ClockTick, SimulationClock, VirtualClock};
pub use config::ClockConfig;
pub use error::ClockError;
pub use metrics::{ClockMetrics, MetricsCollector};

/// Current version of the SimulationClock
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default real-time tick cadence (one virtual step per second)
pub const DEFAULT_TICK_CADENCE_MS: u64 = 1000;

/// Default simulated minutes per tick at speed 1
pub const DEFAULT_STEP_MINUTES: u64 = 5;

/// Largest simulated step per tick: one leap year
pub const MAX_STEP_MINUTES: u64 = 366 * 24 * 60;

/// Default per-subscriber tick buffer
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 16;

/// Default metrics emission interval
pub const DEFAULT_METRICS_INTERVAL_MS: u64 = 10_000;

/// Accepted formats for the configured start timestamp
pub const START_TIME_FORMATS: &[&str] = &["%d/%m/%Y %H:%M:%S", "%Y-%m-%d %H:%M:%S"];
