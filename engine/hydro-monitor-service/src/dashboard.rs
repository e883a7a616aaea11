//! Console dashboard: the downstream observer of the integration object

use std::collections::VecDeque;

use address_space::Variant;
use chrono::NaiveDateTime;
use publisher::{DataChangeNotification, Subscription, ALERT_STATE, DISCHARGE, RAINFALL, SIMULATED_TIME};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DashboardConfig;

/// Items the dashboard subscribes to
pub const DASHBOARD_ITEMS: [&str; 4] = [RAINFALL, DISCHARGE, SIMULATED_TIME, ALERT_STATE];

/// One plotted point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSample {
    pub simulated_time: NaiveDateTime,
    pub rainfall: f64,
    pub discharge: f64,
    pub alert: bool,
}

/// Keeps the last `window` samples for the realtime view and every sample
/// for the history view. Notifications only carry changed items, so the
/// latest value of each item is remembered between them.
#[derive(Debug)]
pub struct Dashboard {
    window: usize,
    rainfall: f64,
    discharge: f64,
    alert: bool,
    simulated_time: Option<NaiveDateTime>,
    realtime: VecDeque<DashboardSample>,
    history: Vec<DashboardSample>,
}

impl Dashboard {
    pub fn new(config: &DashboardConfig) -> Self {
        Self {
            window: config.window.max(1),
            rainfall: 0.0,
            discharge: 0.0,
            alert: false,
            simulated_time: None,
            realtime: VecDeque::with_capacity(config.window.max(1)),
            history: Vec::new(),
        }
    }

    /// Merge a notification. A sample is recorded whenever the simulated time
    /// moves; values published before the first record are not plotted.
    pub fn apply(&mut self, notification: &DataChangeNotification) -> Option<&DashboardSample> {
        let mut time_changed = false;
        for item in &notification.items {
            match (item.name.as_str(), &item.value) {
                (RAINFALL, Variant::Double(v)) => self.rainfall = *v,
                (DISCHARGE, Variant::Double(v)) => self.discharge = *v,
                (ALERT_STATE, Variant::Boolean(b)) => self.alert = *b,
                (SIMULATED_TIME, Variant::DateTime(t)) => {
                    if *t != NaiveDateTime::default() {
                        self.simulated_time = Some(*t);
                        time_changed = true;
                    }
                }
                (name, value) => warn!("Dashboard ignored {} = {}", name, value),
            }
        }

        let simulated_time = self.simulated_time.filter(|_| time_changed)?;
        let sample = DashboardSample {
            simulated_time,
            rainfall: self.rainfall,
            discharge: self.discharge,
            alert: self.alert,
        };
        if self.realtime.len() == self.window {
            self.realtime.pop_front();
        }
        self.realtime.push_back(sample.clone());
        self.history.push(sample);
        self.history.last()
    }

    /// Most recent samples, oldest first
    pub fn realtime(&self) -> impl Iterator<Item = &DashboardSample> {
        self.realtime.iter()
    }

    pub fn history(&self) -> &[DashboardSample] {
        &self.history
    }

    /// Follow `subscription` until `cancel` fires or the publisher closes it
    pub async fn run(mut self, mut subscription: Subscription, cancel: CancellationToken) -> Self {
        info!("Dashboard following subscription {}", subscription.id());

        loop {
            let notification = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                notification = subscription.recv() => match notification {
                    Some(notification) => notification,
                    None => break,
                },
            };

            if let Some(sample) = self.apply(&notification) {
                if sample.alert {
                    warn!(
                        simulated_time = %sample.simulated_time,
                        rainfall = sample.rainfall,
                        discharge = sample.discharge,
                        "ALERT: thresholds exceeded"
                    );
                } else {
                    info!(
                        simulated_time = %sample.simulated_time,
                        rainfall = sample.rainfall,
                        discharge = sample.discharge,
                        "Dashboard update"
                    );
                }
            }
        }

        info!("Dashboard stopped with {} samples in history", self.history.len());
        self
    }
}
