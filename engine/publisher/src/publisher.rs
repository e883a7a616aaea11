//! Consolidated record publication and subscription registry

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use address_space::{AddressSpace, DataValue, Variant};
use aggregator::ConsolidatedRecord;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::PublisherConfig;
use crate::error::PublisherError;
use crate::layout::{IntegrationNodes, ITEM_NAMES};
use crate::subscription::{DeliveryEnd, Subscription, SubscriptionEntry, SubscriptionState};

/// Publisher statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub updates_applied: u64,
    pub notifications_delivered: u64,
    pub subscriptions_opened: u64,
    pub subscriptions_closed: u64,
    pub active_subscriptions: usize,
}

#[derive(Default)]
struct Counters {
    updates_applied: AtomicU64,
    notifications_delivered: Arc<AtomicU64>,
    subscriptions_opened: AtomicU64,
    subscriptions_closed: AtomicU64,
}

struct Inner {
    config: PublisherConfig,
    space: AddressSpace,
    nodes: IntegrationNodes,
    latest: RwLock<Option<Arc<ConsolidatedRecord>>>,
    subscriptions: DashMap<u64, Arc<SubscriptionEntry>>,
    next_subscription_id: AtomicU64,
    counters: Counters,
    /// Parent of every delivery task
    shutdown: CancellationToken,
}

/// Publishes consolidated records into the address space and to subscribers.
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<Inner>,
}

impl Publisher {
    /// Create the integration object in `space`
    pub fn new(config: PublisherConfig, space: &AddressSpace) -> Result<Self, PublisherError> {
        config.validate()?;
        let nodes = IntegrationNodes::create(space, &config.namespace_uri, &config.object_name)?;

        tracing::info!(
            "Publishing {} under {} (ns={})",
            config.object_name,
            config.namespace_uri,
            nodes.namespace
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                space: space.clone(),
                nodes,
                latest: RwLock::new(None),
                subscriptions: DashMap::new(),
                next_subscription_id: AtomicU64::new(1),
                counters: Counters::default(),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn nodes(&self) -> IntegrationNodes {
        self.inner.nodes
    }

    /// Publish a new record: one atomic address-space write, then a diff per
    /// subscription.
    pub fn apply(&self, record: Arc<ConsolidatedRecord>) -> Result<(), PublisherError> {
        let inner = &self.inner;
        inner.space.write_values(&inner.nodes.writes(&record))?;
        *inner.latest.write() = Some(record.clone());
        inner.counters.updates_applied.fetch_add(1, Ordering::Relaxed);

        let latest = self.read_items()?;
        let mut gone = Vec::new();
        for entry in inner.subscriptions.iter() {
            if !entry.offer(&latest, false) {
                gone.push(*entry.key());
            }
        }
        for id in gone {
            self.remove(id, CloseReason::TaskStopped);
        }

        tracing::debug!(tick = record.tick, timestamp = %record.timestamp, "Published consolidated record");
        Ok(())
    }

    /// Latest value of one published item. Reads the address space and never
    /// waits on the pipeline.
    pub fn get_value(&self, name: &str) -> Result<Variant, PublisherError> {
        let node = self.inner.nodes.node(name).ok_or_else(|| PublisherError::UnknownItem(name.to_string()))?;
        Ok(self.inner.space.read_value(node)?.value)
    }

    /// Latest published record, `None` before the first update
    pub fn snapshot(&self) -> Option<Arc<ConsolidatedRecord>> {
        self.inner.latest.read().clone()
    }

    /// Open a subscription on `items`. The current values are queued
    /// immediately; later notifications carry only the items that changed,
    /// at most once per `interval`.
    pub fn open(&self, items: &[&str], interval: Duration) -> Result<Subscription, PublisherError> {
        let inner = &self.inner;
        if items.is_empty() {
            return Err(PublisherError::EmptyItemList);
        }
        if let Some(unknown) = items.iter().find(|name| inner.nodes.node(name).is_none()) {
            return Err(PublisherError::UnknownItem(unknown.to_string()));
        }
        if inner.subscriptions.len() >= inner.config.max_subscriptions {
            return Err(PublisherError::TooManySubscriptions(inner.config.max_subscriptions));
        }

        let mut names: Vec<String> = Vec::with_capacity(items.len());
        for item in items {
            if !names.iter().any(|n| n == item) {
                names.push(item.to_string());
            }
        }

        let id = inner.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let (entry, subscription, task) =
            SubscriptionEntry::create(id, names, interval, inner.config.delivery_timeout(), &inner.shutdown);
        let task = task.counting(inner.counters.notifications_delivered.clone());

        // Registered before the initial read so no concurrent apply falls between them
        inner.subscriptions.insert(id, entry.clone());
        if let Err(e) = entry.offer_current(|| self.read_items()) {
            inner.subscriptions.remove(&id);
            return Err(e);
        }
        inner.counters.subscriptions_opened.fetch_add(1, Ordering::Relaxed);

        let publisher = self.clone();
        tokio::spawn(async move {
            let end = task.run().await;
            publisher.on_delivery_end(id, end);
        });
        entry.activate();

        tracing::info!("Subscription {} opened on {:?} every {:?}", id, entry.items, entry.interval);
        Ok(subscription)
    }

    /// Close a subscription. Pending changes not yet flushed are dropped.
    pub fn close(&self, id: u64) -> Result<(), PublisherError> {
        if self.remove(id, CloseReason::Requested) {
            Ok(())
        } else {
            Err(PublisherError::SubscriptionNotFound(id))
        }
    }

    pub fn subscription_state(&self, id: u64) -> Option<SubscriptionState> {
        self.inner.subscriptions.get(&id).map(|entry| entry.state())
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    pub fn stats(&self) -> PublisherStats {
        let counters = &self.inner.counters;
        PublisherStats {
            updates_applied: counters.updates_applied.load(Ordering::Relaxed),
            notifications_delivered: counters.notifications_delivered.load(Ordering::Relaxed),
            subscriptions_opened: counters.subscriptions_opened.load(Ordering::Relaxed),
            subscriptions_closed: counters.subscriptions_closed.load(Ordering::Relaxed),
            active_subscriptions: self.inner.subscriptions.len(),
        }
    }

    /// Apply records from `updates` until `cancel` fires or the sender is
    /// dropped, then close every subscription.
    pub async fn run(
        self,
        mut updates: mpsc::Receiver<Arc<ConsolidatedRecord>>,
        cancel: CancellationToken,
    ) -> PublisherStats {
        tracing::info!("Starting Publisher");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                update = updates.recv() => match update {
                    Some(record) => {
                        if let Err(e) = self.apply(record) {
                            tracing::error!("Failed to publish consolidated record: {}", e);
                        }
                    }
                    None => break,
                },
            }
        }

        self.shutdown();
        let stats = self.stats();
        tracing::info!(
            "Publisher stopped after {} updates ({} subscriptions opened)",
            stats.updates_applied,
            stats.subscriptions_opened
        );
        stats
    }

    /// Close every subscription and stop their delivery tasks
    pub fn shutdown(&self) {
        let ids: Vec<u64> = self.inner.subscriptions.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.remove(id, CloseReason::Shutdown);
        }
        self.inner.shutdown.cancel();
    }

    fn read_items(&self) -> Result<HashMap<&'static str, DataValue>, PublisherError> {
        let nodes = &self.inner.nodes;
        let ids: Vec<_> = ITEM_NAMES.iter().filter_map(|name| nodes.node(name)).collect();
        let values = self.inner.space.read_values(&ids)?;
        Ok(ITEM_NAMES.into_iter().zip(values).collect())
    }

    fn on_delivery_end(&self, id: u64, end: DeliveryEnd) {
        match end {
            DeliveryEnd::Closed => {}
            DeliveryEnd::ObserverGone => {
                self.remove(id, CloseReason::ObserverGone);
            }
            DeliveryEnd::TimedOut => {
                tracing::warn!(
                    "Subscription {} did not accept a notification within {:?}",
                    id,
                    self.inner.config.delivery_timeout()
                );
                self.remove(id, CloseReason::TimedOut);
            }
        }
    }

    fn remove(&self, id: u64, reason: CloseReason) -> bool {
        let Some((_, entry)) = self.inner.subscriptions.remove(&id) else {
            return false;
        };
        if entry.close() {
            self.inner.counters.subscriptions_closed.fetch_add(1, Ordering::Relaxed);
            match reason {
                CloseReason::Requested | CloseReason::Shutdown => {
                    tracing::info!("Subscription {} closed: {}", id, reason)
                }
                _ => tracing::warn!("Subscription {} closed: {}", id, reason),
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy)]
enum CloseReason {
    Requested,
    Shutdown,
    ObserverGone,
    TimedOut,
    TaskStopped,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            CloseReason::Requested => "closed by observer",
            CloseReason::Shutdown => "publisher shutting down",
            CloseReason::ObserverGone => "observer disconnected",
            CloseReason::TimedOut => "delivery timed out",
            CloseReason::TaskStopped => "delivery task stopped",
        };
        f.write_str(reason)
    }
}
