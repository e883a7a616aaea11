//! Error types for SimulationClock

use address_space::AddressSpaceError;
use thiserror::Error;

/// Errors that can occur in the SimulationClock
#[derive(Error, Debug)]
pub enum ClockError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid start time {value:?}: expected DD/MM/YYYY HH:MM:SS or YYYY-MM-DD HH:MM:SS")]
    InvalidStartTime { value: String },

    #[error("Virtual time overflowed after tick {tick}")]
    TimeOverflow { tick: u64 },

    #[error("Clock is already running")]
    ClockAlreadyRunning,

    #[error("Address space error: {0}")]
    AddressSpace(#[from] AddressSpaceError),

    #[error("Internal error: {0}")]
    Internal(String),
}
