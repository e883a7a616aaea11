//! Error types for the Aggregator

use source_adapter::SourceKind;
use thiserror::Error;

/// Errors raised while building an aggregator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregatorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Required source {0} is not registered")]
    MissingSource(SourceKind),
}
