//! Observer subscriptions and their delivery tasks

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use address_space::{DataValue, Variant};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a subscription. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    Created,
    Active,
    Closed,
}

/// One changed item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemChange {
    pub name: String,
    pub value: Variant,
    pub source_timestamp: DateTime<Utc>,
}

impl ItemChange {
    pub(crate) fn new(name: &str, value: DataValue) -> Self {
        Self { name: name.to_string(), value: value.value, source_timestamp: value.source_timestamp }
    }
}

/// Changes flushed to an observer in one delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChangeNotification {
    pub subscription_id: u64,
    /// Starts at 1 and increases by one per notification
    pub sequence: u64,
    pub items: Vec<ItemChange>,
}

impl DataChangeNotification {
    pub fn get(&self, name: &str) -> Option<&Variant> {
        self.items.iter().find(|item| item.name == name).map(|item| &item.value)
    }
}

/// Observer side of a subscription
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    state: Arc<Mutex<SubscriptionState>>,
    receiver: mpsc::Receiver<DataChangeNotification>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    /// Next notification; `None` once the subscription is closed and drained
    pub async fn recv(&mut self) -> Option<DataChangeNotification> {
        self.receiver.recv().await
    }
}

/// Publisher side of a subscription
pub(crate) struct SubscriptionEntry {
    pub(crate) id: u64,
    pub(crate) items: Vec<String>,
    pub(crate) interval: Duration,
    state: Arc<Mutex<SubscriptionState>>,
    last_delivered: Mutex<HashMap<String, Variant>>,
    queue: mpsc::UnboundedSender<Vec<ItemChange>>,
    cancel: CancellationToken,
}

impl SubscriptionEntry {
    /// Build both halves of a subscription in the `Created` state. The
    /// returned delivery task must be spawned for anything to be delivered.
    pub(crate) fn create(
        id: u64,
        items: Vec<String>,
        interval: Duration,
        delivery_timeout: Duration,
        parent_cancel: &CancellationToken,
    ) -> (Arc<Self>, Subscription, DeliveryTask) {
        let state = Arc::new(Mutex::new(SubscriptionState::Created));
        let (queue, queue_rx) = mpsc::unbounded_channel();
        // One pending notification; a second flush waits up to the delivery timeout
        let (sender, receiver) = mpsc::channel(1);
        let cancel = parent_cancel.child_token();

        let entry = Arc::new(Self {
            id,
            items,
            interval,
            state: state.clone(),
            last_delivered: Mutex::new(HashMap::new()),
            queue,
            cancel: cancel.clone(),
        });
        let task = DeliveryTask {
            id,
            interval,
            delivery_timeout,
            queue: queue_rx,
            sender,
            cancel,
            sequence: 0,
            delivered: None,
        };
        (entry, Subscription { id, state, receiver }, task)
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    pub(crate) fn activate(&self) {
        let mut state = self.state.lock();
        if *state == SubscriptionState::Created {
            *state = SubscriptionState::Active;
        }
    }

    /// Mark closed and stop the delivery task. Returns false if it was
    /// already closed.
    pub(crate) fn close(&self) -> bool {
        let mut state = self.state.lock();
        if *state == SubscriptionState::Closed {
            return false;
        }
        *state = SubscriptionState::Closed;
        self.cancel.cancel();
        true
    }

    /// Queue the items whose value differs from what this subscription last
    /// received. `force` queues every item regardless. Returns false when the
    /// delivery task is gone.
    pub(crate) fn offer(&self, latest: &HashMap<&str, DataValue>, force: bool) -> bool {
        let mut last = self.last_delivered.lock();
        self.queue_changes(&mut last, latest, force)
    }

    /// Queue every item as returned by `read`. The read happens under the
    /// same lock as [`offer`](Self::offer), so a concurrent update is either
    /// already visible to `read` or queued after it.
    pub(crate) fn offer_current<E>(
        &self,
        read: impl FnOnce() -> Result<HashMap<&'static str, DataValue>, E>,
    ) -> Result<bool, E> {
        let mut last = self.last_delivered.lock();
        let current = read()?;
        Ok(self.queue_changes(&mut last, &current, true))
    }

    fn queue_changes(
        &self,
        last: &mut HashMap<String, Variant>,
        latest: &HashMap<&str, DataValue>,
        force: bool,
    ) -> bool {
        let changes: Vec<ItemChange> = self
            .items
            .iter()
            .filter_map(|name| {
                let value = latest.get(name.as_str())?;
                if !force && last.get(name) == Some(&value.value) {
                    return None;
                }
                last.insert(name.clone(), value.value.clone());
                Some(ItemChange::new(name, value.clone()))
            })
            .collect();

        if changes.is_empty() {
            return true;
        }
        self.queue.send(changes).is_ok()
    }
}

/// Why a delivery task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryEnd {
    Closed,
    ObserverGone,
    TimedOut,
}

/// Drains a subscription's queue and flushes the accumulated changes to the
/// observer once per interval.
pub(crate) struct DeliveryTask {
    id: u64,
    interval: Duration,
    delivery_timeout: Duration,
    queue: mpsc::UnboundedReceiver<Vec<ItemChange>>,
    sender: mpsc::Sender<DataChangeNotification>,
    cancel: CancellationToken,
    sequence: u64,
    delivered: Option<Arc<AtomicU64>>,
}

impl DeliveryTask {
    /// Count successful flushes in `counter`
    pub(crate) fn counting(mut self, counter: Arc<AtomicU64>) -> Self {
        self.delivered = Some(counter);
        self
    }

    pub(crate) async fn run(mut self) -> DeliveryEnd {
        // Latest change per item, in item name order
        let mut pending: BTreeMap<String, ItemChange> = BTreeMap::new();
        let mut ticker = (!self.interval.is_zero()).then(|| {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return DeliveryEnd::Closed,
                _ = self.sender.closed() => return DeliveryEnd::ObserverGone,
                _ = next_flush(&mut ticker), if !pending.is_empty() => {}
                changes = self.queue.recv() => {
                    match changes {
                        Some(changes) => {
                            for change in changes {
                                pending.insert(change.name.clone(), change);
                            }
                        }
                        None => return DeliveryEnd::Closed,
                    }
                    if ticker.is_some() {
                        continue;
                    }
                }
            }

            if let Err(end) = self.flush(&mut pending).await {
                return end;
            }
        }
    }

    async fn flush(&mut self, pending: &mut BTreeMap<String, ItemChange>) -> Result<(), DeliveryEnd> {
        if pending.is_empty() {
            return Ok(());
        }
        self.sequence += 1;
        let notification = DataChangeNotification {
            subscription_id: self.id,
            sequence: self.sequence,
            items: std::mem::take(pending).into_values().collect(),
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DeliveryEnd::Closed),
            result = self.sender.send_timeout(notification, self.delivery_timeout) => match result {
                Ok(()) => {
                    if let Some(counter) = &self.delivered {
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(())
                }
                Err(SendTimeoutError::Closed(_)) => Err(DeliveryEnd::ObserverGone),
                Err(SendTimeoutError::Timeout(_)) => Err(DeliveryEnd::TimedOut),
            },
        }
    }
}

async fn next_flush(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
