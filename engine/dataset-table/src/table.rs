//! Sorted, uniquely keyed reading table

use chrono::NaiveDateTime;

use crate::error::LoadError;
use crate::reading::{MatchKey, Resolution, TableKey, TimestampedReading};

/// Immutable table of readings for one source.
///
/// Readings are sorted ascending by their key (`match_key` applied at
/// `resolution`) and keys are unique, which is what makes [`lookup`] a binary
/// search.
///
/// [`lookup`]: DatasetTable::lookup
#[derive(Debug, Clone)]
pub struct DatasetTable {
    match_key: MatchKey,
    resolution: Resolution,
    keys: Vec<TableKey>,
    readings: Vec<TimestampedReading>,
}

impl DatasetTable {
    /// Build a table from readings in any order.
    ///
    /// Fails with [`LoadError::DuplicateTimestamp`] when two rows collapse to the
    /// same key and with [`LoadError::Empty`] when there is nothing to replay.
    pub fn from_readings(
        readings: Vec<TimestampedReading>,
        match_key: MatchKey,
        resolution: Resolution,
    ) -> Result<Self, LoadError> {
        if readings.is_empty() {
            return Err(LoadError::Empty);
        }

        // Row numbers are 1-based positions in the input, kept for diagnostics
        let mut keyed: Vec<(TableKey, usize, TimestampedReading)> = readings
            .into_iter()
            .enumerate()
            .map(|(i, r)| (match_key.key(resolution, r.timestamp), i + 1, r))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        for pair in keyed.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(LoadError::DuplicateTimestamp {
                    key: pair[0].0.to_string(),
                    first_row: pair[0].1,
                    second_row: pair[1].1,
                });
            }
        }

        let (keys, readings) = keyed.into_iter().map(|(k, _, r)| (k, r)).unzip();
        Ok(Self { match_key, resolution, keys, readings })
    }

    /// Find the row whose key equals the key of `ts`. O(log n).
    pub fn lookup(&self, ts: NaiveDateTime) -> Option<&TimestampedReading> {
        let key = self.match_key.key(self.resolution, ts);
        self.keys.binary_search(&key).ok().map(|idx| &self.readings[idx])
    }

    pub fn match_key(&self) -> MatchKey {
        self.match_key
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn first(&self) -> Option<&TimestampedReading> {
        self.readings.first()
    }

    pub fn last(&self) -> Option<&TimestampedReading> {
        self.readings.last()
    }

    /// Readings in key order
    pub fn iter(&self) -> impl Iterator<Item = &TimestampedReading> {
        self.readings.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::ReadingValue;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 10, 29).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn table(rows: &[(u32, u32, f64)]) -> DatasetTable {
        let readings =
            rows.iter().map(|&(h, m, v)| TimestampedReading::new(at(h, m), v)).collect();
        DatasetTable::from_readings(readings, MatchKey::DateTime, Resolution::Minute).unwrap()
    }

    #[test]
    fn test_rows_are_sorted_on_build() {
        let t = table(&[(10, 10, 3.0), (10, 0, 1.0), (10, 5, 2.0)]);
        let values: Vec<f64> = t.iter().filter_map(|r| r.value.as_f64()).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert_eq!(t.first().unwrap().timestamp, at(10, 0));
        assert_eq!(t.last().unwrap().timestamp, at(10, 10));
    }

    #[test]
    fn test_lookup_exact_and_truncated() {
        let t = table(&[(10, 0, 5.0), (10, 5, 12.0)]);
        assert_eq!(t.lookup(at(10, 5)).unwrap().value, ReadingValue::Number(12.0));

        let with_seconds = at(10, 0) + chrono::Duration::seconds(37);
        assert_eq!(t.lookup(with_seconds).unwrap().value, ReadingValue::Number(5.0));
    }

    #[test]
    fn test_lookup_miss() {
        let t = table(&[(10, 0, 5.0), (10, 5, 12.0)]);
        assert!(t.lookup(at(10, 3)).is_none());
        assert!(t.lookup(at(9, 55)).is_none());
        assert!(t.lookup(at(11, 0)).is_none());
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let readings = vec![
            TimestampedReading::new(at(10, 0), 1.0),
            TimestampedReading::new(at(10, 0) + chrono::Duration::seconds(20), 2.0),
        ];
        let err =
            DatasetTable::from_readings(readings, MatchKey::DateTime, Resolution::Minute).unwrap_err();
        match err {
            LoadError::DuplicateTimestamp { first_row, second_row, .. } => {
                assert_eq!((first_row, second_row), (1, 2));
            }
            other => panic!("Expected DuplicateTimestamp, got {other:?}"),
        }
    }

    #[test]
    fn test_second_resolution_keeps_rows_apart() {
        let readings = vec![
            TimestampedReading::new(at(10, 0), 1.0),
            TimestampedReading::new(at(10, 0) + chrono::Duration::seconds(20), 2.0),
        ];
        let t = DatasetTable::from_readings(readings, MatchKey::DateTime, Resolution::Second)
            .unwrap();
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_time_of_day_lookup_across_dates() {
        let readings = vec![
            TimestampedReading::new(at(0, 0), 0.2),
            TimestampedReading::new(at(0, 5), 0.4),
        ];
        let t = DatasetTable::from_readings(readings, MatchKey::TimeOfDay, Resolution::Minute)
            .unwrap();
        let next_day = NaiveDate::from_ymd_opt(2024, 11, 2).unwrap().and_hms_opt(0, 5, 0).unwrap();
        assert_eq!(t.lookup(next_day).unwrap().value, ReadingValue::Number(0.4));
    }

    #[test]
    fn test_empty_table_rejected() {
        let err = DatasetTable::from_readings(Vec::new(), MatchKey::DateTime, Resolution::Minute)
            .unwrap_err();
        assert!(matches!(err, LoadError::Empty));
    }
}
