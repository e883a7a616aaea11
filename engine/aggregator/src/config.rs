//! Configuration for the Aggregator

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::AggregatorError;
use crate::{DEFAULT_DISCHARGE_THRESHOLD, DEFAULT_RAINFALL_THRESHOLD, DEFAULT_SYNC_TIMEOUT_MS};

/// Alert is raised when either reading is strictly above its threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub rainfall_mm_h: f64,
    pub discharge_m3_s: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self { rainfall_mm_h: DEFAULT_RAINFALL_THRESHOLD, discharge_m3_s: DEFAULT_DISCHARGE_THRESHOLD }
    }
}

impl AlertThresholds {
    pub fn validate(&self) -> Result<(), AggregatorError> {
        for (name, value) in [("rainfall_mm_h", self.rainfall_mm_h), ("discharge_m3_s", self.discharge_m3_s)] {
            if !value.is_finite() || value < 0.0 {
                return Err(AggregatorError::Config(format!(
                    "threshold {name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Aggregator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub thresholds: AlertThresholds,

    /// How long a round waits for its slowest source, in milliseconds
    pub sync_timeout_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { thresholds: AlertThresholds::default(), sync_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS }
    }
}

impl AggregatorConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), AggregatorError> {
        self.thresholds.validate()?;
        if self.sync_timeout_ms == 0 {
            return Err(AggregatorError::Config("sync_timeout_ms must be greater than 0".into()));
        }
        Ok(())
    }
}
