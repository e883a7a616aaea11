//! Configuration for SimulationClock

use crate::error::ClockError;
use crate::{
    DEFAULT_METRICS_INTERVAL_MS, DEFAULT_STEP_MINUTES, DEFAULT_SUBSCRIBER_BUFFER,
    DEFAULT_TICK_CADENCE_MS, MAX_STEP_MINUTES, START_TIME_FORMATS,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the SimulationClock
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Virtual start time, `DD/MM/YYYY HH:MM:SS` or `YYYY-MM-DD HH:MM:SS`
    pub start: String,

    /// Real-time tick cadence in milliseconds (default: 1000ms)
    pub tick_cadence_ms: u64,

    /// Simulated minutes per tick at speed 1
    pub base_step_minutes: u64,

    /// Simulation speed: simulated minutes per real minute, as a multiple of the base step
    pub speed: u32,

    /// Ticks buffered per subscriber before delivery waits
    pub subscriber_buffer: usize,

    /// Metrics emission interval in milliseconds
    pub metrics_interval_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            start: "29/10/2024 00:00:00".to_string(),
            tick_cadence_ms: DEFAULT_TICK_CADENCE_MS,
            base_step_minutes: DEFAULT_STEP_MINUTES,
            speed: 1,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            metrics_interval_ms: DEFAULT_METRICS_INTERVAL_MS,
        }
    }
}

impl ClockConfig {
    /// Get tick cadence as Duration
    pub fn tick_cadence(&self) -> Duration {
        Duration::from_millis(self.tick_cadence_ms)
    }

    /// Get metrics interval as Duration
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    /// Simulated minutes per tick, `None` on overflow
    pub fn step_minutes(&self) -> Option<u64> {
        self.base_step_minutes.checked_mul(u64::from(self.speed))
    }

    /// Simulated time added on every tick. At most [`MAX_STEP_MINUTES`].
    pub fn step(&self) -> Result<chrono::Duration, ClockError> {
        let too_large = || {
            ClockError::Config(format!(
                "base_step_minutes ({}) x speed ({}) must not exceed {} minutes",
                self.base_step_minutes, self.speed, MAX_STEP_MINUTES
            ))
        };
        let minutes = self.step_minutes().filter(|m| *m <= MAX_STEP_MINUTES).ok_or_else(too_large)?;
        let minutes = i64::try_from(minutes).map_err(|_| too_large())?;
        chrono::Duration::try_minutes(minutes).ok_or_else(too_large)
    }

    /// Parse the configured start time
    pub fn start_timestamp(&self) -> Result<NaiveDateTime, ClockError> {
        parse_start_time(&self.start)
    }

    /// Check every field. Called before the clock is built so a bad start time
    /// stops the process before any component runs.
    pub fn validate(&self) -> Result<(), ClockError> {
        self.start_timestamp()?;

        if self.tick_cadence_ms == 0 {
            return Err(ClockError::Config("tick_cadence_ms must be greater than 0".into()));
        }
        if self.base_step_minutes == 0 {
            return Err(ClockError::Config("base_step_minutes must be greater than 0".into()));
        }
        if self.speed == 0 {
            return Err(ClockError::Config("speed must be greater than 0".into()));
        }
        if self.subscriber_buffer == 0 {
            return Err(ClockError::Config("subscriber_buffer must be greater than 0".into()));
        }
        self.step()?;

        Ok(())
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, ClockError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClockError::Config(format!("Failed to read {path}: {e}")))?;
        let config: ClockConfig = toml::from_str(&content)
            .map_err(|e| ClockError::Config(format!("Failed to parse {path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &str) -> Result<(), ClockError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ClockError::Config(format!("Failed to serialize clock config: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| ClockError::Config(format!("Failed to write {path}: {e}")))?;
        Ok(())
    }
}

/// Parse a start time in any of [`START_TIME_FORMATS`]
pub fn parse_start_time(value: &str) -> Result<NaiveDateTime, ClockError> {
    let trimmed = value.trim();
    START_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| ClockError::InvalidStartTime { value: value.to_string() })
}
