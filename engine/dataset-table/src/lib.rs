//! # Dataset Table
//!
//! Historical sensor readings loaded once at startup and replayed against the
//! simulated clock. A table is sorted by its lookup key and keys are unique, so
//! resolving a virtual timestamp is a binary search rather than a scan.

pub mod error;
pub mod loader;
pub mod reading;
pub mod table;

pub use error::LoadError;
pub use loader::{load_csv, load_from_reader, ColumnSelector, LoadOptions, ValueKind};
pub use reading::{MatchKey, ReadingValue, Resolution, TimestampedReading};
pub use table::DatasetTable;
