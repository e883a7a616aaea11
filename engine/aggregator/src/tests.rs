//! Unit tests for round synchronization, alert derivation and the Aggregator task

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use dataset_table::ReadingValue;
use simulation_clock::ClockTick;
use source_adapter::{ResolvedValue, SourceKind};
use tokio::time::Instant;

use crate::{evaluate_alert, Aggregator, AggregatorConfig, AggregatorError, AlertThresholds};

fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 10, 29).unwrap().and_hms_opt(h, m, 0).unwrap()
}

fn value(source: SourceKind, tick: u64, timestamp: NaiveDateTime, v: impl Into<ReadingValue>) -> ResolvedValue {
    ResolvedValue { source, tick, timestamp, value: v.into(), matched: true }
}

fn rain(tick: u64, timestamp: NaiveDateTime, v: f64) -> ResolvedValue {
    value(SourceKind::Rainfall, tick, timestamp, v)
}

fn flow(tick: u64, timestamp: NaiveDateTime, v: f64) -> ResolvedValue {
    value(SourceKind::Discharge, tick, timestamp, v)
}

fn aggregator() -> Aggregator {
    Aggregator::new(AggregatorConfig::default(), [SourceKind::Rainfall, SourceKind::Discharge]).unwrap()
}

mod barrier_tests {
    use super::*;

    #[test]
    fn test_record_per_completed_timestamp() {
        let mut agg = aggregator();
        let now = Instant::now();

        assert!(agg.on_value(rain(1, at(10, 0), 5.0), now).is_none());
        let first = agg.on_value(flow(1, at(10, 0), 20.0), now).unwrap();
        assert_eq!(first.tick, 1);
        assert_eq!(first.timestamp, at(10, 0));
        assert_eq!(first.rainfall, 5.0);
        assert!(!first.alert);

        agg.on_value(flow(2, at(10, 5), 20.0), now);
        let second = agg.on_value(rain(2, at(10, 5), 12.0), now).unwrap();
        assert_eq!(second.rainfall, 12.0);
        assert!(!second.alert);
        assert_eq!(agg.current().unwrap(), second);
        assert_eq!(agg.stats().rounds_completed, 2);
    }

    #[test]
    fn test_high_discharge_raises_alert_regardless_of_rainfall() {
        let mut agg = aggregator();
        let now = Instant::now();
        agg.on_value(rain(1, at(10, 0), 0.0), now);
        let record = agg.on_value(flow(1, at(10, 0), 200.0), now).unwrap();
        assert!(record.alert);
        assert_eq!(agg.stats().alert_transitions, 1);
        assert!(agg.stats().alert);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut agg = aggregator();
        let now = Instant::now();
        agg.on_value(rain(1, at(10, 0), 50.0), now);
        assert!(!agg.on_value(flow(1, at(10, 0), 150.0), now).unwrap().alert);
    }

    #[test]
    fn test_duplicate_value_first_wins() {
        let mut agg = aggregator();
        let now = Instant::now();
        agg.on_value(rain(1, at(10, 0), 5.0), now);
        assert!(agg.on_value(rain(1, at(10, 0), 99.0), now).is_none());
        let record = agg.on_value(flow(1, at(10, 0), 1.0), now).unwrap();
        assert_eq!(record.rainfall, 5.0);
        assert_eq!(agg.stats().duplicate_values, 1);
    }

    #[test]
    fn test_slow_source_times_out_and_previous_record_is_held() {
        let mut agg = aggregator();
        let t0 = Instant::now();
        agg.on_value(rain(1, at(10, 0), 5.0), t0);
        let held = agg.on_value(flow(1, at(10, 0), 10.0), t0).unwrap();

        agg.on_tick(&ClockTick { tick: 2, timestamp: at(10, 5) }, t0);
        agg.on_value(rain(2, at(10, 5), 80.0), t0);
        assert_eq!(agg.next_deadline(), Some(t0 + Duration::from_millis(800)));

        assert_eq!(agg.expire(t0 + Duration::from_millis(799)), 0);
        assert_eq!(agg.expire(t0 + Duration::from_millis(800)), 1);
        assert_eq!(agg.pending_rounds(), 0);
        assert_eq!(agg.current().unwrap(), held);
        assert_eq!(agg.stats().sync_timeouts, 1);

        // The straggler arrives after its round was dropped
        assert!(agg.on_value(flow(2, at(10, 5), 10.0), t0).is_none());
        assert_eq!(agg.stats().late_values, 1);
        assert_eq!(agg.pending_rounds(), 0);
    }

    #[test]
    fn test_newer_round_completing_first_drops_older_rounds() {
        let mut agg = aggregator();
        let now = Instant::now();
        agg.on_value(rain(1, at(10, 0), 1.0), now);
        agg.on_value(rain(2, at(10, 5), 2.0), now);
        let newer = agg.on_value(flow(2, at(10, 5), 3.0), now).unwrap();
        assert_eq!(newer.timestamp, at(10, 5));
        assert_eq!(agg.stats().sync_timeouts, 1);

        assert!(agg.on_value(flow(1, at(10, 0), 3.0), now).is_none());
        assert_eq!(agg.current().unwrap().timestamp, at(10, 5));
    }

    #[test]
    fn test_tick_for_finalized_timestamp_is_ignored() {
        let mut agg = aggregator();
        let now = Instant::now();
        agg.on_value(rain(1, at(10, 0), 1.0), now);
        agg.on_value(flow(1, at(10, 0), 1.0), now);
        agg.on_tick(&ClockTick { tick: 1, timestamp: at(10, 0) }, now);
        assert_eq!(agg.pending_rounds(), 0);
        assert_eq!(agg.next_deadline(), None);
    }

    #[test]
    fn test_station_status_joins_the_barrier_when_registered() {
        let sources = [SourceKind::Rainfall, SourceKind::Discharge, SourceKind::StationStatus];
        let mut agg = Aggregator::new(AggregatorConfig::default(), sources).unwrap();
        let now = Instant::now();

        agg.on_value(rain(1, at(10, 0), 1.0), now);
        assert!(agg.on_value(flow(1, at(10, 0), 1.0), now).is_none());
        let record = agg
            .on_value(value(SourceKind::StationStatus, 1, at(10, 0), "Normal"), now)
            .unwrap();
        assert_eq!(record.station_status.as_deref(), Some("Normal"));
    }

    #[test]
    fn test_unregistered_source_is_ignored() {
        let mut agg = aggregator();
        let now = Instant::now();
        assert!(agg.on_value(value(SourceKind::StationStatus, 1, at(10, 0), "Normal"), now).is_none());
        assert_eq!(agg.pending_rounds(), 0);
    }

    #[test]
    fn test_alert_transitions_are_counted_both_ways() {
        let mut agg = aggregator();
        let now = Instant::now();
        for (i, (r, d)) in [(10.0, 10.0), (60.0, 10.0), (70.0, 10.0), (10.0, 10.0)].into_iter().enumerate() {
            let ts = at(10, 5 * i as u32);
            agg.on_value(rain(i as u64 + 1, ts, r), now);
            agg.on_value(flow(i as u64 + 1, ts, d), now);
        }
        assert_eq!(agg.stats().alert_transitions, 2);
        assert!(!agg.stats().alert);
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AggregatorConfig::default();
        assert_eq!(config.thresholds.rainfall_mm_h, 50.0);
        assert_eq!(config.thresholds.discharge_m3_s, 150.0);
        assert_eq!(config.sync_timeout(), Duration::from_millis(800));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let zero_timeout = AggregatorConfig { sync_timeout_ms: 0, ..Default::default() };
        assert!(matches!(zero_timeout.validate(), Err(AggregatorError::Config(_))));

        for thresholds in [
            AlertThresholds { rainfall_mm_h: -1.0, ..Default::default() },
            AlertThresholds { discharge_m3_s: f64::NAN, ..Default::default() },
            AlertThresholds { rainfall_mm_h: f64::INFINITY, ..Default::default() },
        ] {
            let config = AggregatorConfig { thresholds, ..Default::default() };
            assert!(Aggregator::new(config, [SourceKind::Rainfall, SourceKind::Discharge]).is_err());
        }
    }

    #[test]
    fn test_rainfall_and_discharge_are_required() {
        let err = Aggregator::new(AggregatorConfig::default(), [SourceKind::Rainfall]).err().unwrap();
        assert_eq!(err, AggregatorError::MissingSource(SourceKind::Discharge));
    }
}

mod alert_properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_alert_matches_threshold_rule(
            rainfall in 0.0f64..500.0,
            discharge in 0.0f64..1000.0,
            rain_limit in 0.0f64..200.0,
            flow_limit in 0.0f64..400.0,
        ) {
            let thresholds = AlertThresholds { rainfall_mm_h: rain_limit, discharge_m3_s: flow_limit };
            let config = AggregatorConfig { thresholds, ..Default::default() };
            let mut agg = Aggregator::new(config, [SourceKind::Rainfall, SourceKind::Discharge]).unwrap();
            let now = Instant::now();

            agg.on_value(rain(1, at(10, 0), rainfall), now);
            let record = agg.on_value(flow(1, at(10, 0), discharge), now).unwrap();

            prop_assert_eq!(record.alert, rainfall > rain_limit || discharge > flow_limit);
            prop_assert_eq!(record.alert, evaluate_alert(rainfall, discharge, &thresholds));
        }
    }
}

mod run_tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn test_run_publishes_completed_rounds_in_order() {
        let (values_tx, values_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(aggregator().run(None, values_rx, out_tx, cancel.clone()));

        values_tx.send(rain(1, at(10, 0), 5.0)).await.unwrap();
        values_tx.send(flow(1, at(10, 0), 1.0)).await.unwrap();
        values_tx.send(flow(2, at(10, 5), 200.0)).await.unwrap();
        values_tx.send(rain(2, at(10, 5), 12.0)).await.unwrap();

        let first: Arc<_> = out_rx.recv().await.unwrap();
        let second = out_rx.recv().await.unwrap();
        assert!(first.timestamp < second.timestamp);
        assert!(!first.alert);
        assert!(second.alert);

        cancel.cancel();
        let stats = tokio_test::assert_ok!(task.await);
        assert_eq!(stats.rounds_completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out_a_lagging_round() {
        let (values_tx, values_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(aggregator().run(None, values_rx, out_tx, cancel.clone()));

        values_tx.send(rain(1, at(10, 0), 5.0)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        values_tx.send(flow(1, at(10, 0), 1.0)).await.unwrap();
        values_tx.send(rain(2, at(10, 5), 6.0)).await.unwrap();
        values_tx.send(flow(2, at(10, 5), 2.0)).await.unwrap();

        let record = out_rx.recv().await.unwrap();
        assert_eq!(record.tick, 2);

        drop(values_tx);
        let stats = task.await.unwrap();
        assert_eq!(stats.sync_timeouts, 1);
        assert_eq!(stats.late_values, 1);
        assert_eq!(stats.rounds_completed, 1);
    }
}
