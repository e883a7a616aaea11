//! Configuration for source adapters

use address_space::RetryPolicy;
use dataset_table::ReadingValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upstream feeds known to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Rainfall,
    Discharge,
    StationStatus,
}

impl SourceKind {
    /// Address-space object the adapter mirrors into
    pub fn object_name(self) -> &'static str {
        match self {
            SourceKind::Rainfall => "RainGauge",
            SourceKind::Discharge | SourceKind::StationStatus => "GaugingStation",
        }
    }

    /// Variable holding the resolved value inside [`object_name`](Self::object_name)
    pub fn variable_name(self) -> &'static str {
        match self {
            SourceKind::Rainfall => "Rainfall_mm_h",
            SourceKind::Discharge => "Discharge_m3_s",
            SourceKind::StationStatus => "Status",
        }
    }

    /// Value reported before the first match
    pub fn default_fallback(self) -> ReadingValue {
        match self {
            SourceKind::Rainfall | SourceKind::Discharge => ReadingValue::Number(0.0),
            SourceKind::StationStatus => ReadingValue::Label("Unknown".to_string()),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Rainfall => "rainfall",
            SourceKind::Discharge => "discharge",
            SourceKind::StationStatus => "station_status",
        };
        f.write_str(name)
    }
}

/// What a tick without a matching row reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissPolicy {
    /// Keep reporting the last matched value
    #[default]
    Hold,
    /// Report the fallback value
    Zero,
}

/// Per-adapter configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub miss_policy: MissPolicy,

    /// Overrides [`SourceKind::default_fallback`]
    pub fallback: Option<ReadingValue>,

    /// Clock resubscription policy
    pub retry: RetryPolicy,
}

impl AdapterConfig {
    pub fn fallback_for(&self, kind: SourceKind) -> ReadingValue {
        self.fallback.clone().unwrap_or_else(|| kind.default_fallback())
    }
}
