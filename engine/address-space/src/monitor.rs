//! Sampled change subscriptions on a single variable

use std::time::Duration;

use futures::stream::{self, Stream};
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};

use crate::node::{DataValue, NodeId};

/// Change stream for one variable.
///
/// The first call to [`next`](Self::next) yields the current value. After that
/// each call waits for a change and yields the latest value, never more often
/// than the sampling interval. Changes that happen within one interval are
/// collapsed into the most recent value. The stream ends when the address
/// space is dropped.
pub struct MonitoredItem {
    node: NodeId,
    receiver: watch::Receiver<DataValue>,
    sampler: Option<Interval>,
    initial_sent: bool,
}

impl MonitoredItem {
    pub(crate) fn new(node: NodeId, receiver: watch::Receiver<DataValue>, interval: Duration) -> Self {
        let sampler = (!interval.is_zero()).then(|| {
            let mut sampler = tokio::time::interval(interval);
            sampler.set_missed_tick_behavior(MissedTickBehavior::Delay);
            sampler
        });
        Self { node, receiver, sampler, initial_sent: false }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub async fn next(&mut self) -> Option<DataValue> {
        if !self.initial_sent {
            self.initial_sent = true;
            if let Some(sampler) = self.sampler.as_mut() {
                // Consume the immediate first tick so the next sample is one interval away
                sampler.tick().await;
            }
            return Some(self.receiver.borrow_and_update().clone());
        }

        self.receiver.changed().await.ok()?;
        if let Some(sampler) = self.sampler.as_mut() {
            sampler.tick().await;
        }
        Some(self.receiver.borrow_and_update().clone())
    }

    pub fn into_stream(self) -> impl Stream<Item = DataValue> {
        stream::unfold(self, |mut item| async move { item.next().await.map(|v| (v, item)) })
    }
}
