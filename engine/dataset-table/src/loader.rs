//! CSV dataset loader
//!
//! Turns an exported sensor sheet into a [`DatasetTable`]. Header-skip count,
//! row count, column selection and number formats are all driven by
//! [`LoadOptions`] so the same loader handles the rain gauge export (preamble
//! rows, positional columns, values rounded up to 0.1 mm/h) and the gauging
//! station export (named columns, decimal commas, a status label column).

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LoadError;
use crate::reading::{MatchKey, ReadingValue, Resolution, TimestampedReading};
use crate::table::DatasetTable;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"];

/// Column reference, by zero-based position or by header name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnSelector {
    Index(usize),
    Name(String),
}

impl std::fmt::Display for ColumnSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnSelector::Index(i) => write!(f, "#{i}"),
            ColumnSelector::Name(n) => write!(f, "{n:?}"),
        }
    }
}

/// How the value column is interpreted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueKind {
    /// Measurement; optionally rounded up to a number of decimals
    Numeric {
        #[serde(default)]
        round_up_decimals: Option<u32>,
    },
    /// Enumerated status; blank cells become `missing`
    Label {
        #[serde(default = "default_missing_label")]
        missing: String,
    },
}

fn default_missing_label() -> String {
    "Unknown".to_string()
}

impl Default for ValueKind {
    fn default() -> Self {
        ValueKind::Numeric { round_up_decimals: None }
    }
}

/// Loader options for one dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    pub timestamp_column: ColumnSelector,
    pub value_column: ColumnSelector,

    /// Raw lines dropped before the header (or first record)
    pub skip_rows: usize,

    pub has_headers: bool,

    /// Maximum number of records read after the header
    pub max_rows: Option<usize>,

    pub delimiter: char,

    /// Accept `12,5` as `12.5`
    pub decimal_comma: bool,

    pub value_kind: ValueKind,
    pub match_key: MatchKey,
    pub resolution: Resolution,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            timestamp_column: ColumnSelector::Index(0),
            value_column: ColumnSelector::Index(1),
            skip_rows: 0,
            has_headers: true,
            max_rows: None,
            delimiter: ',',
            decimal_comma: false,
            value_kind: ValueKind::default(),
            match_key: MatchKey::DateTime,
            resolution: Resolution::Minute,
        }
    }
}

/// Load a CSV file into a table
pub fn load_csv(path: impl AsRef<Path>, options: &LoadOptions) -> Result<DatasetTable, LoadError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|source| LoadError::Io { path: path.to_path_buf(), source })?;
    let table = load_from_reader(content.as_bytes(), options)?;
    debug!("Loaded {} readings from {:?}", table.len(), path);
    Ok(table)
}

/// Load CSV data from any reader
pub fn load_from_reader<R: std::io::Read>(
    mut reader: R,
    options: &LoadOptions,
) -> Result<DatasetTable, LoadError> {
    let delimiter = u8::try_from(options.delimiter)
        .ok()
        .filter(u8::is_ascii)
        .ok_or(LoadError::InvalidDelimiter(options.delimiter))?;

    let mut content = String::new();
    reader
        .read_to_string(&mut content)
        .map_err(|source| LoadError::Io { path: "<reader>".into(), source })?;

    let body = skip_lines(&content, options.skip_rows);
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(options.has_headers)
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let headers = if options.has_headers { Some(csv_reader.headers()?.clone()) } else { None };
    let ts_idx = resolve_column(&options.timestamp_column, headers.as_ref())?;
    let value_idx = resolve_column(&options.value_column, headers.as_ref())?;
    let value_name = options.value_column.to_string();

    // Line number of the first record in the original file, 1-based
    let first_line = options.skip_rows + usize::from(options.has_headers) + 1;
    let limit = options.max_rows.unwrap_or(usize::MAX);

    let mut readings = Vec::new();
    for (i, record) in csv_reader.records().take(limit).enumerate() {
        let record = record?;
        let row = first_line + i;

        if record.iter().all(|field| field.is_empty()) {
            continue;
        }

        let raw_ts = record.get(ts_idx).ok_or_else(|| LoadError::MissingField {
            row,
            column: options.timestamp_column.to_string(),
        })?;
        let timestamp = parse_timestamp(raw_ts)
            .ok_or_else(|| LoadError::MalformedTimestamp { row, value: raw_ts.to_string() })?;

        let raw_value = record.get(value_idx).unwrap_or("");
        let value = match &options.value_kind {
            ValueKind::Numeric { round_up_decimals } => {
                let v = parse_number(raw_value, options.decimal_comma).ok_or_else(|| {
                    LoadError::MalformedValue {
                        row,
                        column: value_name.clone(),
                        value: raw_value.to_string(),
                    }
                })?;
                ReadingValue::Number(match round_up_decimals {
                    Some(decimals) => round_up(v, *decimals),
                    None => v,
                })
            }
            ValueKind::Label { missing } => {
                if raw_value.is_empty() {
                    ReadingValue::Label(missing.clone())
                } else {
                    ReadingValue::Label(raw_value.to_string())
                }
            }
        };

        readings.push(TimestampedReading { timestamp, value });
    }

    DatasetTable::from_readings(readings, options.match_key, options.resolution)
}

fn skip_lines(content: &str, n: usize) -> &str {
    if n == 0 {
        return content;
    }
    match content.match_indices('\n').nth(n - 1) {
        Some((idx, _)) => &content[idx + 1..],
        None => "",
    }
}

fn resolve_column(
    selector: &ColumnSelector,
    headers: Option<&csv::StringRecord>,
) -> Result<usize, LoadError> {
    match selector {
        ColumnSelector::Index(i) => Ok(*i),
        ColumnSelector::Name(name) => headers
            .and_then(|h| h.iter().position(|header| header == name))
            .ok_or_else(|| LoadError::MissingColumn(name.clone())),
    }
}

/// Parse a dataset timestamp. Time-only cells are placed on 1970-01-01 and only
/// make sense with [`MatchKey::TimeOfDay`].
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            let time = TIME_FORMATS.iter().find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())?;
            NaiveDate::from_ymd_opt(1970, 1, 1).map(|d| d.and_time(time))
        })
}

fn parse_number(raw: &str, decimal_comma: bool) -> Option<f64> {
    let raw = raw.trim();
    let parsed = if decimal_comma {
        raw.replace(',', ".").parse::<f64>().ok()
    } else {
        raw.parse::<f64>().ok()
    };
    parsed.filter(|v| v.is_finite())
}

fn round_up(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    let scaled = (value * factor).ceil();
    // ceil on a float product can land on x.0000000001; re-round to the grid
    (scaled / factor * factor).round() / factor
}
