//! Node identifiers and values

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node identifier within an address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub namespace: u16,
    pub id: u32,
}

impl NodeId {
    pub const fn new(namespace: u16, id: u32) -> Self {
        Self { namespace, id }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={};i={}", self.namespace, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    Object,
    Variable,
}

/// Typed variable value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variant {
    Double(f64),
    Boolean(bool),
    String(String),
    DateTime(NaiveDateTime),
}

impl Variant {
    pub fn type_name(&self) -> &'static str {
        match self {
            Variant::Double(_) => "Double",
            Variant::Boolean(_) => "Boolean",
            Variant::String(_) => "String",
            Variant::DateTime(_) => "DateTime",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Variant::DateTime(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Double(v) => write!(f, "{v}"),
            Variant::Boolean(v) => write!(f, "{v}"),
            Variant::String(s) => f.write_str(s),
            Variant::DateTime(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Double(v)
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Boolean(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(v)
    }
}

impl From<NaiveDateTime> for Variant {
    fn from(v: NaiveDateTime) -> Self {
        Variant::DateTime(v)
    }
}

/// A variable value with the wall-clock time it was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataValue {
    pub value: Variant,
    pub source_timestamp: DateTime<Utc>,
}

impl DataValue {
    pub fn now(value: Variant) -> Self {
        Self { value, source_timestamp: Utc::now() }
    }
}
