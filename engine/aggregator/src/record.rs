//! The consolidated record and alert evaluation

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::AlertThresholds;

/// The consolidated view of one virtual timestamp. Built whole and shared as
/// an `Arc`; never modified after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedRecord {
    pub tick: u64,
    pub timestamp: NaiveDateTime,
    pub rainfall: f64,
    pub discharge: f64,
    pub alert: bool,
    pub station_status: Option<String>,
}

/// `rainfall > threshold OR discharge > threshold`
pub fn evaluate_alert(rainfall: f64, discharge: f64, thresholds: &AlertThresholds) -> bool {
    rainfall > thresholds.rainfall_mm_h || discharge > thresholds.discharge_m3_s
}
