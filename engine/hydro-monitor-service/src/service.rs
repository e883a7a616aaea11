//! Service state management and component initialization

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use address_space::{AddressSpace, TransportError};
use aggregator::Aggregator;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use dataset_table::load_csv;
use parking_lot::Mutex;
use publisher::Publisher;
use simulation_clock::{ClockHandle, ClockMetrics, ClockSubscription, SimulationClock};
use source_adapter::{AdapterStats, ClockSource, SourceAdapter, SourceKind, StatsCollector};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ServiceConfig;
use crate::dashboard::{Dashboard, DASHBOARD_ITEMS};

/// A spawned pipeline task
pub struct ServiceTask {
    pub name: String,
    pub handle: JoinHandle<()>,
}

impl ServiceTask {
    fn spawn<F>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        info!("Starting {}...", name);
        Self { name, handle: tokio::spawn(future) }
    }
}

/// Hands out a subscription taken before the clock started, then falls back
/// to live subscriptions for reconnects
struct Presubscribed {
    first: Mutex<Option<ClockSubscription>>,
    handle: ClockHandle,
}

#[async_trait]
impl ClockSource for Presubscribed {
    async fn subscribe(&self) -> Result<ClockSubscription, TransportError> {
        let first = self.first.lock().take();
        match first {
            Some(subscription) => Ok(subscription),
            None => self.handle.subscribe(),
        }
    }
}

/// Components built by [`ServiceState::new`] and consumed by [`ServiceState::start`]
struct Components {
    clock: SimulationClock,
    adapters: Vec<SourceAdapter>,
    aggregator: Aggregator,
}

/// Service state containing all initialized components
pub struct ServiceState {
    pub config: ServiceConfig,
    space: AddressSpace,
    clock: ClockHandle,
    publisher: Publisher,
    adapter_stats: Vec<(SourceKind, Arc<StatsCollector>)>,
    cancel: CancellationToken,
    pending: Option<Components>,
}

impl ServiceState {
    /// Load every dataset and build the pipeline. Nothing runs until
    /// [`start`](Self::start).
    pub fn new(config: ServiceConfig) -> Result<Self> {
        info!("Initializing service components...");
        config.validate().context("Invalid configuration")?;

        let space = AddressSpace::new();

        // First namespace registered, so the integration object lands in ns=2
        info!("Initializing Publisher...");
        let publisher =
            Publisher::new(config.publisher.clone(), &space).context("Failed to create Publisher")?;

        info!("Initializing SimulationClock...");
        let mut clock =
            SimulationClock::new(config.clock.clone()).context("Failed to create SimulationClock")?;
        clock
            .attach_address_space(&space, &config.service.clock_namespace_uri)
            .context("Failed to expose SimulationClock")?;

        let mut adapters = Vec::new();
        for (kind, source) in config.sources.enabled() {
            info!("Loading {} dataset from {:?}...", kind, source.path);
            let table = load_csv(&source.path, &source.load)
                .with_context(|| format!("Failed to load {kind} dataset {:?}", source.path))?;
            if let (Some(first), Some(last)) = (table.first(), table.last()) {
                info!(
                    "{} dataset: {} rows from {} to {}",
                    kind,
                    table.len(),
                    first.timestamp,
                    last.timestamp
                );
            }

            let mut adapter = SourceAdapter::new(kind, Arc::new(table), source.adapter.clone())
                .with_context(|| format!("Failed to create {kind} adapter"))?;
            adapter
                .attach_address_space(&space, &config.service.sensor_namespace_uri)
                .with_context(|| format!("Failed to expose {kind} adapter"))?;
            adapters.push(adapter);
        }

        info!("Initializing Aggregator...");
        let aggregator = Aggregator::new(config.aggregator.clone(), adapters.iter().map(|a| a.kind()))
            .context("Failed to create Aggregator")?;

        let adapter_stats = adapters.iter().map(|a| (a.kind(), a.stats_handle())).collect();

        info!("Service components initialized successfully");
        Ok(Self {
            clock: clock.handle(),
            config,
            space,
            publisher,
            adapter_stats,
            cancel: CancellationToken::new(),
            pending: Some(Components { clock, adapters, aggregator }),
        })
    }

    /// Spawn every pipeline task. Every consumer subscribes to the clock
    /// before the clock task is spawned, so tick 1 reaches all of them.
    pub fn start(&mut self) -> Result<Vec<ServiceTask>> {
        let Some(Components { clock, adapters, aggregator }) = self.pending.take() else {
            bail!("Service already started");
        };

        let capacity = self.config.service.channel_capacity;
        let (values_tx, values_rx) = mpsc::channel(capacity);
        let (records_tx, records_rx) = mpsc::channel(capacity);
        let mut tasks = Vec::new();

        let publisher = self.publisher.clone();
        let cancel = self.cancel.clone();
        tasks.push(ServiceTask::spawn("Publisher", async move {
            publisher.run(records_rx, cancel).await;
        }));

        if self.config.dashboard.enabled {
            let interval = Duration::from_millis(self.config.dashboard.interval_ms);
            let subscription =
                self.publisher.open(&DASHBOARD_ITEMS, interval).context("Failed to subscribe dashboard")?;
            let dashboard = Dashboard::new(&self.config.dashboard);
            let cancel = self.cancel.clone();
            tasks.push(ServiceTask::spawn("Dashboard", async move {
                dashboard.run(subscription, cancel).await;
            }));
        }

        let ticks = self.clock.subscribe().context("Failed to subscribe Aggregator to the clock")?;
        let cancel = self.cancel.clone();
        tasks.push(ServiceTask::spawn("Aggregator", async move {
            let stats = aggregator.run(Some(ticks), values_rx, records_tx, cancel).await;
            info!(
                "Aggregator summary: {} rounds, {} sync timeouts, {} late values, {} alert transitions",
                stats.rounds_completed,
                stats.sync_timeouts,
                stats.late_values,
                stats.alert_transitions
            );
        }));

        for adapter in adapters {
            let kind = adapter.kind();
            let source = Presubscribed {
                first: Mutex::new(Some(
                    self.clock
                        .subscribe()
                        .with_context(|| format!("Failed to subscribe {kind} adapter to the clock"))?,
                )),
                handle: self.clock.clone(),
            };
            let out = values_tx.clone();
            let cancel = self.cancel.clone();
            tasks.push(ServiceTask::spawn(format!("{kind} adapter"), async move {
                if let Err(e) = adapter.run(source, out, cancel).await {
                    error!("{} adapter stopped: {}", kind, e);
                }
            }));
        }
        drop(values_tx);

        let cancel = self.cancel.clone();
        tasks.push(ServiceTask::spawn("SimulationClock", async move {
            if let Err(e) = clock.run(cancel).await {
                error!("SimulationClock failed: {}", e);
            }
        }));

        Ok(tasks)
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn clock(&self) -> &ClockHandle {
        &self.clock
    }

    pub fn clock_metrics(&self) -> ClockMetrics {
        self.clock.get_metrics()
    }

    pub fn adapter_stats(&self) -> Vec<(SourceKind, AdapterStats)> {
        self.adapter_stats.iter().map(|(kind, stats)| (*kind, stats.snapshot())).collect()
    }

    /// Token every task stops on
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.config.service.shutdown_timeout_secs)
    }

    /// Signal every task to stop
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
