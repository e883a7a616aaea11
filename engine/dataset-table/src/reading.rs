//! Reading and key types

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single dataset value: a measurement or an enumerated status label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Number(f64),
    Label(String),
}

impl ReadingValue {
    /// Numeric view of the value, `None` for labels
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReadingValue::Number(v) => Some(*v),
            ReadingValue::Label(_) => None,
        }
    }

    pub fn as_label(&self) -> Option<&str> {
        match self {
            ReadingValue::Number(_) => None,
            ReadingValue::Label(s) => Some(s),
        }
    }
}

impl fmt::Display for ReadingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingValue::Number(v) => write!(f, "{v}"),
            ReadingValue::Label(s) => f.write_str(s),
        }
    }
}

impl From<f64> for ReadingValue {
    fn from(v: f64) -> Self {
        ReadingValue::Number(v)
    }
}

impl From<&str> for ReadingValue {
    fn from(s: &str) -> Self {
        ReadingValue::Label(s.to_string())
    }
}

/// A loaded row. Immutable once the table is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedReading {
    pub timestamp: NaiveDateTime,
    pub value: ReadingValue,
}

impl TimestampedReading {
    pub fn new(timestamp: NaiveDateTime, value: impl Into<ReadingValue>) -> Self {
        Self { timestamp, value: value.into() }
    }
}

/// Granularity at which table keys and lookups are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Second,
    #[default]
    Minute,
}

impl Resolution {
    /// Drop every component finer than the resolution
    pub fn truncate(self, ts: NaiveDateTime) -> NaiveDateTime {
        let ts = ts.with_nanosecond(0).unwrap_or(ts);
        match self {
            Resolution::Second => ts,
            Resolution::Minute => ts.with_second(0).unwrap_or(ts),
        }
    }
}

/// Which part of the timestamp identifies a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKey {
    /// Full date and time must match
    #[default]
    DateTime,
    /// Only the time of day matters; used to replay a single-day record
    TimeOfDay,
}

/// Normalized lookup key. Ordering follows the underlying instant/time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableKey {
    At(NaiveDateTime),
    Daily(NaiveTime),
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKey::At(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
            TableKey::Daily(t) => write!(f, "{}", t.format("%H:%M:%S")),
        }
    }
}

impl MatchKey {
    pub fn key(self, resolution: Resolution, ts: NaiveDateTime) -> TableKey {
        let ts = resolution.truncate(ts);
        match self {
            MatchKey::DateTime => TableKey::At(ts),
            MatchKey::TimeOfDay => TableKey::Daily(ts.time()),
        }
    }
}
