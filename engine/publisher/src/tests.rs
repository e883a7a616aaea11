//! Unit tests for the integration object and subscriptions

use std::sync::Arc;
use std::time::Duration;

use address_space::{AddressSpace, NodeId, Variant};
use aggregator::ConsolidatedRecord;
use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    Publisher, PublisherConfig, PublisherError, SubscriptionState, ALERT_STATE, DISCHARGE, ITEM_NAMES,
    RAINFALL, SIMULATED_TIME, STATION_STATUS,
};

fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 10, 29).unwrap().and_hms_opt(h, m, 0).unwrap()
}

fn record(tick: u64, rainfall: f64, discharge: f64) -> Arc<ConsolidatedRecord> {
    Arc::new(ConsolidatedRecord {
        tick,
        timestamp: at(10, 0) + chrono::Duration::minutes(5 * (tick as i64 - 1)),
        rainfall,
        discharge,
        alert: rainfall > 50.0 || discharge > 150.0,
        station_status: None,
    })
}

fn publisher() -> Publisher {
    Publisher::new(PublisherConfig::default(), &AddressSpace::new()).unwrap()
}

mod layout_tests {
    use super::*;

    #[test]
    fn test_integration_layout() {
        let space = AddressSpace::new();
        let publisher = Publisher::new(PublisherConfig::default(), &space).unwrap();
        let nodes = publisher.nodes();

        assert_eq!(nodes.namespace, 2);
        assert_eq!(nodes.object, NodeId::new(2, 1));
        assert_eq!(nodes.rainfall, NodeId::new(2, 2));
        assert_eq!(nodes.discharge, NodeId::new(2, 3));
        assert_eq!(nodes.simulated_time, NodeId::new(2, 4));
        assert_eq!(nodes.alert_state, NodeId::new(2, 5));
        assert_eq!(nodes.station_status, NodeId::new(2, 6));

        let object = space.find_child(space.objects_folder(), "Integration").unwrap();
        assert_eq!(object, nodes.object);
        for name in ITEM_NAMES {
            assert!(space.find_child(object, name).is_ok(), "{name} missing");
        }
        assert_eq!(space.namespace_uri(2).as_deref(), Some("urn:hydro-monitor:integration"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PublisherConfig { delivery_timeout_ms: 0, ..Default::default() };
        assert!(matches!(
            Publisher::new(config, &AddressSpace::new()),
            Err(PublisherError::Config(_))
        ));
    }
}

mod value_tests {
    use super::*;

    #[test]
    fn test_apply_writes_every_field() {
        let publisher = publisher();
        let mut rec = (*record(2, 60.0, 20.0)).clone();
        rec.station_status = Some("Normal".into());
        publisher.apply(Arc::new(rec)).unwrap();

        assert_eq!(publisher.get_value(RAINFALL).unwrap(), Variant::Double(60.0));
        assert_eq!(publisher.get_value(DISCHARGE).unwrap(), Variant::Double(20.0));
        assert_eq!(publisher.get_value(SIMULATED_TIME).unwrap(), Variant::DateTime(at(10, 5)));
        assert_eq!(publisher.get_value(ALERT_STATE).unwrap(), Variant::Boolean(true));
        assert_eq!(publisher.get_value(STATION_STATUS).unwrap(), Variant::String("Normal".into()));
    }

    #[test]
    fn test_reads_between_updates_are_identical() {
        let publisher = publisher();
        assert!(publisher.snapshot().is_none());
        tokio_test::assert_ok!(publisher.apply(record(1, 5.0, 10.0)));

        assert_eq!(publisher.get_value(RAINFALL).unwrap(), publisher.get_value(RAINFALL).unwrap());
        let a = publisher.snapshot().unwrap();
        let b = publisher.snapshot().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(publisher.stats().updates_applied, 1);
    }

    #[test]
    fn test_unknown_item() {
        let publisher = publisher();
        assert_eq!(
            publisher.get_value("WaterLevel").unwrap_err(),
            PublisherError::UnknownItem("WaterLevel".into())
        );
    }
}

mod subscription_tests {
    use super::*;

    #[tokio::test]
    async fn test_open_validates_items() {
        let publisher = publisher();
        assert_eq!(publisher.open(&[], Duration::ZERO).unwrap_err(), PublisherError::EmptyItemList);
        assert_eq!(
            publisher.open(&[RAINFALL, "Level"], Duration::ZERO).unwrap_err(),
            PublisherError::UnknownItem("Level".into())
        );
        assert_eq!(publisher.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_limit() {
        let space = AddressSpace::new();
        let config = PublisherConfig { max_subscriptions: 1, ..Default::default() };
        let publisher = Publisher::new(config, &space).unwrap();
        let _first = publisher.open(&[RAINFALL], Duration::ZERO).unwrap();
        assert_eq!(
            publisher.open(&[RAINFALL], Duration::ZERO).unwrap_err(),
            PublisherError::TooManySubscriptions(1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_notification_then_only_changes() {
        let publisher = publisher();
        publisher.apply(record(1, 5.0, 10.0)).unwrap();

        let mut sub = publisher.open(&[RAINFALL, DISCHARGE, ALERT_STATE], Duration::ZERO).unwrap();
        assert_eq!(sub.state(), SubscriptionState::Active);
        assert_eq!(publisher.subscription_state(sub.id()), Some(SubscriptionState::Active));

        let initial = sub.recv().await.unwrap();
        assert_eq!(initial.sequence, 1);
        assert_eq!(initial.subscription_id, sub.id());
        assert_eq!(initial.items.len(), 3);
        assert_eq!(initial.get(RAINFALL), Some(&Variant::Double(5.0)));

        publisher.apply(record(2, 12.0, 10.0)).unwrap();
        let change = sub.recv().await.unwrap();
        assert_eq!(change.sequence, 2);
        assert_eq!(change.items.len(), 1);
        assert_eq!(change.get(RAINFALL), Some(&Variant::Double(12.0)));
        assert_eq!(change.get(DISCHARGE), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_open_racing_apply_ends_on_latest_value() {
        for _ in 0..200 {
            let publisher = publisher();
            publisher.apply(record(1, 1.0, 0.0)).unwrap();

            let barrier = Arc::new(tokio::sync::Barrier::new(2));
            let opener = {
                let (publisher, barrier) = (publisher.clone(), barrier.clone());
                tokio::spawn(async move {
                    barrier.wait().await;
                    publisher.open(&[RAINFALL], Duration::ZERO).unwrap()
                })
            };
            let updater = {
                let (publisher, barrier) = (publisher.clone(), barrier.clone());
                tokio::spawn(async move {
                    barrier.wait().await;
                    publisher.apply(record(2, 2.0, 0.0)).unwrap();
                })
            };
            updater.await.unwrap();
            let mut sub = opener.await.unwrap();

            loop {
                let notification = tokio::time::timeout(Duration::from_secs(1), sub.recv())
                    .await
                    .expect("observer never saw the latest rainfall")
                    .unwrap();
                if notification.get(RAINFALL) == Some(&Variant::Double(2.0)) {
                    break;
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_within_an_interval_are_coalesced() {
        let publisher = publisher();
        let mut sub = publisher.open(&[RAINFALL], Duration::from_secs(2)).unwrap();
        assert_eq!(sub.recv().await.unwrap().sequence, 1);

        let start = tokio::time::Instant::now();
        publisher.apply(record(1, 1.0, 0.0)).unwrap();
        publisher.apply(record(2, 2.0, 0.0)).unwrap();
        publisher.apply(record(3, 3.0, 0.0)).unwrap();

        let next = sub.recv().await.unwrap();
        assert_eq!(next.sequence, 2);
        assert_eq!(next.get(RAINFALL), Some(&Variant::Double(3.0)));
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_one_subscription_leaves_the_other_running() {
        let publisher = publisher();
        let mut kept = publisher.open(&[RAINFALL, ALERT_STATE], Duration::ZERO).unwrap();
        let mut closed = publisher.open(&[RAINFALL, ALERT_STATE], Duration::ZERO).unwrap();
        kept.recv().await.unwrap();
        closed.recv().await.unwrap();

        publisher.apply(record(1, 10.0, 0.0)).unwrap();
        assert_eq!(kept.recv().await.unwrap().get(RAINFALL), Some(&Variant::Double(10.0)));
        assert_eq!(closed.recv().await.unwrap().get(RAINFALL), Some(&Variant::Double(10.0)));

        publisher.close(closed.id()).unwrap();
        assert_eq!(closed.state(), SubscriptionState::Closed);
        assert_eq!(publisher.subscription_state(closed.id()), None);
        assert_eq!(
            publisher.close(closed.id()).unwrap_err(),
            PublisherError::SubscriptionNotFound(closed.id())
        );

        for tick in 2..=4 {
            publisher.apply(record(tick, 20.0 * tick as f64, 0.0)).unwrap();
            let notification = kept.recv().await.unwrap();
            assert_eq!(notification.get(RAINFALL), Some(&Variant::Double(20.0 * tick as f64)));
        }
        assert!(closed.recv().await.is_none());

        let stats = publisher.stats();
        assert_eq!(stats.subscriptions_opened, 2);
        assert_eq!(stats.subscriptions_closed, 1);
        assert_eq!(stats.active_subscriptions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_observer_is_removed() {
        let publisher = publisher();
        let sub = publisher.open(&[RAINFALL], Duration::ZERO).unwrap();
        drop(sub);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(publisher.subscription_count(), 0);
        assert_eq!(publisher.stats().subscriptions_closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_observer_times_out_without_blocking_others() {
        let space = AddressSpace::new();
        let config = PublisherConfig { delivery_timeout_ms: 100, ..Default::default() };
        let publisher = Publisher::new(config, &space).unwrap();

        let stalled = publisher.open(&[RAINFALL], Duration::ZERO).unwrap();
        let mut live = publisher.open(&[RAINFALL], Duration::ZERO).unwrap();
        live.recv().await.unwrap();

        for tick in 1..=3 {
            publisher.apply(record(tick, tick as f64, 0.0)).unwrap();
            assert_eq!(live.recv().await.unwrap().get(RAINFALL), Some(&Variant::Double(tick as f64)));
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(stalled.state(), SubscriptionState::Closed);
        assert_eq!(publisher.subscription_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_applies_updates_and_closes_subscriptions_on_cancel() {
        let publisher = publisher();
        let mut sub = publisher.open(&[SIMULATED_TIME], Duration::ZERO).unwrap();
        sub.recv().await.unwrap();

        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(publisher.clone().run(rx, cancel.clone()));

        tx.send(record(1, 0.0, 0.0)).await.unwrap();
        let notification = sub.recv().await.unwrap();
        assert_eq!(notification.get(SIMULATED_TIME), Some(&Variant::DateTime(at(10, 0))));

        cancel.cancel();
        let stats = task.await.unwrap();
        assert_eq!(stats.updates_applied, 1);
        assert!(stats.notifications_delivered >= 2);
        assert!(sub.recv().await.is_none());
        assert_eq!(sub.state(), SubscriptionState::Closed);
    }
}
