//! Error types for dataset loading

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading a dataset. All of them are fatal for the source.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read dataset {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Delimiter {0:?} is not a single ASCII character")]
    InvalidDelimiter(char),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Column {0} not found")]
    MissingColumn(String),

    #[error("Row {row}: column {column} is missing")]
    MissingField { row: usize, column: String },

    #[error("Row {row}: malformed timestamp {value:?}")]
    MalformedTimestamp { row: usize, value: String },

    #[error("Row {row}: malformed numeric value {value:?} in column {column}")]
    MalformedValue { row: usize, column: String, value: String },

    #[error("Duplicate timestamp {key} (rows {first_row} and {second_row})")]
    DuplicateTimestamp { key: String, first_row: usize, second_row: usize },

    #[error("Dataset contains no readings")]
    Empty,
}
