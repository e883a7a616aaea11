//! Unit tests for SimulationClock configuration, virtual time and metrics

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};

use crate::clock::VirtualClock;
use crate::config::parse_start_time;
use crate::{ClockConfig, ClockError, DEFAULT_STEP_MINUTES, DEFAULT_TICK_CADENCE_MS, MAX_STEP_MINUTES};

fn ten_o_clock() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 10, 29).unwrap().and_hms_opt(10, 0, 0).unwrap()
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_clock_config_default() {
        let config = ClockConfig::default();
        assert_eq!(config.tick_cadence_ms, DEFAULT_TICK_CADENCE_MS);
        assert_eq!(config.base_step_minutes, DEFAULT_STEP_MINUTES);
        assert_eq!(config.speed, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_clock_config_duration_conversion() {
        let config = ClockConfig { speed: 3, ..Default::default() };
        assert_eq!(config.tick_cadence(), Duration::from_millis(1000));
        assert_eq!(config.step().unwrap(), chrono::Duration::minutes(15));
    }

    #[test]
    fn test_start_time_formats() {
        assert_eq!(parse_start_time("29/10/2024 10:00:00").unwrap(), ten_o_clock());
        assert_eq!(parse_start_time("2024-10-29 10:00:00").unwrap(), ten_o_clock());
        assert_eq!(parse_start_time("  29/10/2024 10:00:00 ").unwrap(), ten_o_clock());
    }

    #[test]
    fn test_unparsable_start_time_fails_fast() {
        let config = ClockConfig { start: "tomorrow morning".into(), ..Default::default() };
        match config.validate() {
            Err(ClockError::InvalidStartTime { value }) => assert_eq!(value, "tomorrow morning"),
            other => panic!("Expected InvalidStartTime, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_values_rejected() {
        for config in [
            ClockConfig { tick_cadence_ms: 0, ..Default::default() },
            ClockConfig { base_step_minutes: 0, ..Default::default() },
            ClockConfig { speed: 0, ..Default::default() },
            ClockConfig { subscriber_buffer: 0, ..Default::default() },
        ] {
            assert!(matches!(config.validate(), Err(ClockError::Config(_))));
        }
    }

    #[test]
    fn test_oversized_step_rejected() {
        let year = ClockConfig { base_step_minutes: MAX_STEP_MINUTES, ..Default::default() };
        assert!(year.validate().is_ok());

        for config in [
            ClockConfig { base_step_minutes: MAX_STEP_MINUTES + 1, ..Default::default() },
            ClockConfig { base_step_minutes: MAX_STEP_MINUTES, speed: 2, ..Default::default() },
            ClockConfig { base_step_minutes: 1_000_000_000, ..Default::default() },
            ClockConfig { base_step_minutes: u64::MAX / 2, speed: 4, ..Default::default() },
        ] {
            assert!(matches!(config.validate(), Err(ClockError::Config(_))));
            assert!(config.step().is_err());
            assert!(crate::SimulationClock::new(config).is_err());
        }
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clock.toml");
        let path = path.to_str().unwrap();

        let config = ClockConfig { start: "2024-10-29 10:00:00".into(), speed: 2, ..Default::default() };
        config.to_file(path).unwrap();

        let loaded = ClockConfig::from_file(path).unwrap();
        assert_eq!(loaded.start, "2024-10-29 10:00:00");
        assert_eq!(loaded.speed, 2);
    }

    #[test]
    fn test_config_file_partial_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clock.toml");
        std::fs::write(&path, "speed = 4\n").unwrap();

        let loaded = ClockConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.speed, 4);
        assert_eq!(loaded.tick_cadence_ms, DEFAULT_TICK_CADENCE_MS);
    }
}

#[cfg(test)]
mod virtual_clock_tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_tick_is_start_time() {
        let mut clock = VirtualClock::new(ten_o_clock(), chrono::Duration::minutes(5));
        let first = clock.advance().unwrap();
        assert_eq!(first.tick, 1);
        assert_eq!(first.timestamp, ten_o_clock());

        let second = clock.advance().unwrap();
        assert_eq!(second.tick, 2);
        assert_eq!(second.timestamp, ten_o_clock() + chrono::Duration::minutes(5));
        assert_eq!(clock.tick_count(), 2);
        assert_eq!(clock.current(), second.timestamp);
    }

    #[test]
    fn test_advance_past_calendar_end_fails() {
        let start = NaiveDateTime::MAX - chrono::Duration::minutes(3);
        let mut clock = VirtualClock::new(start, chrono::Duration::minutes(5));
        assert_eq!(clock.advance().unwrap().timestamp, start);

        assert!(matches!(clock.advance(), Err(ClockError::TimeOverflow { tick: 1 })));
        assert_eq!(clock.current(), start);
        assert_eq!(clock.tick_count(), 1);
    }

    proptest! {
        #[test]
        fn prop_virtual_time_never_decreases(
            step_minutes in 1u64..120,
            speed in 1u32..20,
            ticks in 1usize..300,
            offset_minutes in 0i64..1_000_000,
        ) {
            let config = ClockConfig { base_step_minutes: step_minutes, speed, ..Default::default() };
            let start = ten_o_clock() + chrono::Duration::minutes(offset_minutes);
            let mut clock = VirtualClock::new(start, config.step().unwrap());

            let mut previous = clock.advance().unwrap();
            for _ in 1..ticks {
                let next = clock.advance().unwrap();
                prop_assert!(next.timestamp > previous.timestamp);
                prop_assert_eq!(next.tick, previous.tick + 1);
                previous = next;
            }
        }
    }
}

#[cfg(test)]
mod metrics_tests {
    use crate::metrics::MetricsCollector;
    use std::time::Duration;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new(100);
        let metrics = collector.get_metrics();

        assert_eq!(metrics.current_tick, 0);
        assert_eq!(metrics.subscribers, 0);
        assert_eq!(metrics.total_ticks, 0);
    }

    #[test]
    fn test_metrics_recording() {
        let collector = MetricsCollector::new(100);

        collector.record_tick(1, Duration::from_micros(100), 3, 0);
        collector.record_tick(2, Duration::from_micros(300), 2, 1);
        collector.update_subscribers(3);

        let metrics = collector.get_metrics();
        assert_eq!(metrics.current_tick, 2);
        assert_eq!(metrics.tick_duration_ns, 300_000);
        assert_eq!(metrics.max_tick_duration_ns, 300_000);
        assert_eq!(metrics.avg_tick_duration_ns, 200_000);
        assert_eq!(metrics.total_ticks, 2);
        assert_eq!(metrics.total_deliveries, 5);
        assert_eq!(metrics.total_skipped, 1);
        assert_eq!(metrics.last_skipped, 1);
        assert_eq!(metrics.subscribers, 3);
    }

    #[test]
    fn test_metrics_reset() {
        let collector = MetricsCollector::new(10);
        collector.record_tick(1, Duration::from_micros(100), 1, 0);
        collector.reset();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.total_ticks, 0);
        assert_eq!(metrics.max_tick_duration_ns, 0);
        assert_eq!(metrics.avg_tick_duration_ns, 0);
    }
}
