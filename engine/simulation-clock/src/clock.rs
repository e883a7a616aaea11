//! Core SimulationClock implementation

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use address_space::{AddressSpace, NodeId, TransportError, Variant};
use chrono::NaiveDateTime;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ClockConfig;
use crate::error::ClockError;
use crate::metrics::{ClockMetrics, MetricsCollector};

/// One clock emission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockTick {
    /// 1-based tick number
    pub tick: u64,
    pub timestamp: NaiveDateTime,
}

/// Virtual time owned by the clock task. Never rewinds.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    current: NaiveDateTime,
    tick_count: u64,
    step: chrono::Duration,
}

impl VirtualClock {
    pub fn new(start: NaiveDateTime, step: chrono::Duration) -> Self {
        Self { current: start, tick_count: 0, step }
    }

    /// Produce the next tick. The first tick carries the start time, every
    /// later tick is one step after the previous one. Fails without moving
    /// once the next time is past the end of the calendar.
    pub fn advance(&mut self) -> Result<ClockTick, ClockError> {
        if self.tick_count > 0 {
            self.current = self
                .current
                .checked_add_signed(self.step)
                .ok_or(ClockError::TimeOverflow { tick: self.tick_count })?;
        }
        self.tick_count += 1;
        Ok(ClockTick { tick: self.tick_count, timestamp: self.current })
    }

    pub fn current(&self) -> NaiveDateTime {
        self.current
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }
}

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<ClockTick>,
}

/// State shared between the clock task and its handles
struct Shared {
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscriber_id: AtomicU64,
    is_running: AtomicBool,
    stopped: AtomicBool,
    buffer: usize,
    metrics: MetricsCollector,
}

impl Shared {
    fn subscribe(&self) -> Result<ClockSubscription, TransportError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected("simulation clock".to_string()));
        }
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.lock();
        subscribers.push(Subscriber { id, sender });
        self.metrics.update_subscribers(subscribers.len());
        tracing::debug!("Clock subscriber {} registered", id);

        Ok(ClockSubscription { id, receiver })
    }
}

/// Receiving end of a clock subscription. Ticks arrive in publication order;
/// `recv` returns `None` once the clock has stopped.
#[derive(Debug)]
pub struct ClockSubscription {
    id: u64,
    receiver: mpsc::Receiver<ClockTick>,
}

impl ClockSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<ClockTick> {
        self.receiver.recv().await
    }
}

/// Cloneable handle for subscribing to a clock that may already be running
#[derive(Clone)]
pub struct ClockHandle {
    shared: Arc<Shared>,
}

impl ClockHandle {
    pub fn subscribe(&self) -> Result<ClockSubscription, TransportError> {
        self.shared.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running.load(Ordering::Relaxed)
    }

    pub fn get_metrics(&self) -> ClockMetrics {
        self.shared.metrics.get_metrics()
    }
}

struct ClockNodes {
    space: AddressSpace,
    simulated_time: NodeId,
    tick_count: NodeId,
}

/// The SimulationClock - the heartbeat that drives virtual time
pub struct SimulationClock {
    clock: VirtualClock,
    config: ClockConfig,
    shared: Arc<Shared>,
    mirror: Option<ClockNodes>,
}

impl SimulationClock {
    /// Create a new SimulationClock. Validates the configuration.
    pub fn new(config: ClockConfig) -> Result<Self, ClockError> {
        config.validate()?;
        let start = config.start_timestamp()?;
        let step = config.step()?;

        tracing::info!(
            "Creating SimulationClock at {} (step {} min every {:?})",
            start,
            step.num_minutes(),
            config.tick_cadence()
        );

        let shared = Arc::new(Shared {
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
            is_running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            buffer: config.subscriber_buffer,
            metrics: MetricsCollector::new(1000), // Keep 1000 tick history
        });

        Ok(Self { clock: VirtualClock::new(start, step), config, shared, mirror: None })
    }

    /// Expose the virtual time as `SimulatedClock/SimulatedTime` in `space`
    pub fn attach_address_space(
        &mut self,
        space: &AddressSpace,
        namespace_uri: &str,
    ) -> Result<(), ClockError> {
        let ns = space.register_namespace(namespace_uri);
        let object = space.add_object(space.objects_folder(), ns, "SimulatedClock")?;
        let simulated_time = space.add_variable(object, ns, "SimulatedTime", self.clock.current())?;
        let tick_count = space.add_variable(object, ns, "TickCount", 0.0)?;
        self.mirror = Some(ClockNodes { space: space.clone(), simulated_time, tick_count });
        Ok(())
    }

    pub fn handle(&self) -> ClockHandle {
        ClockHandle { shared: self.shared.clone() }
    }

    pub fn subscribe(&self) -> Result<ClockSubscription, TransportError> {
        self.shared.subscribe()
    }

    pub fn current(&self) -> NaiveDateTime {
        self.clock.current()
    }

    pub fn get_metrics(&self) -> ClockMetrics {
        self.shared.metrics.get_metrics()
    }

    /// Run the clock until `cancel` fires. Subscribers see their channel close
    /// when this returns.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ClockError> {
        if self.shared.is_running.swap(true, Ordering::SeqCst) {
            return Err(ClockError::ClockAlreadyRunning);
        }

        tracing::info!("Starting SimulationClock main loop");

        let mut ticker = tokio::time::interval(self.config.tick_cadence());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_metrics_emission = Instant::now();
        let mut outcome = Ok(());

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let tick_start = Instant::now();
            let tick = match self.clock.advance() {
                Ok(tick) => tick,
                Err(e) => {
                    tracing::error!("Stopping SimulationClock: {}", e);
                    outcome = Err(e);
                    break;
                }
            };
            self.mirror_tick(&tick);

            let (delivered, skipped) = self.publish(tick).await;
            self.shared.metrics.record_tick(tick.tick, tick_start.elapsed(), delivered, skipped);

            tracing::debug!(tick = tick.tick, virtual_time = %tick.timestamp, delivered, "Clock tick");

            if last_metrics_emission.elapsed() >= self.config.metrics_interval() {
                self.emit_metrics();
                last_metrics_emission = Instant::now();
            }
        }

        self.shared.is_running.store(false, Ordering::SeqCst);
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.subscribers.lock().clear();
        self.shared.metrics.update_subscribers(0);

        tracing::info!(
            "SimulationClock stopped at {} after {} ticks",
            self.clock.current(),
            self.clock.tick_count()
        );
        outcome
    }

    /// Deliver a tick to every subscriber. Each subscriber gets at most one
    /// tick period to make room; closed subscribers are dropped.
    async fn publish(&self, tick: ClockTick) -> (u32, u32) {
        let targets: Vec<(u64, mpsc::Sender<ClockTick>)> =
            self.shared.subscribers.lock().iter().map(|s| (s.id, s.sender.clone())).collect();
        if targets.is_empty() {
            return (0, 0);
        }

        let timeout = self.config.tick_cadence();
        let results = join_all(targets.into_iter().map(|(id, sender)| async move {
            (id, sender.send_timeout(tick, timeout).await)
        }))
        .await;

        let mut delivered = 0;
        let mut skipped = 0;
        let mut closed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(SendTimeoutError::Timeout(_)) => {
                    tracing::warn!("Clock subscriber {} is lagging, skipped tick {}", id, tick.tick);
                    skipped += 1;
                }
                Err(SendTimeoutError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.shared.subscribers.lock();
            subscribers.retain(|s| !closed.contains(&s.id));
            self.shared.metrics.update_subscribers(subscribers.len());
            tracing::debug!("Removed {} closed clock subscribers", closed.len());
        }

        (delivered, skipped)
    }

    fn mirror_tick(&self, tick: &ClockTick) {
        if let Some(nodes) = &self.mirror {
            let writes: [(NodeId, Variant); 2] = [
                (nodes.simulated_time, Variant::DateTime(tick.timestamp)),
                (nodes.tick_count, Variant::Double(tick.tick as f64)),
            ];
            if let Err(e) = nodes.space.write_values(&writes) {
                tracing::warn!("Failed to mirror clock tick {}: {}", tick.tick, e);
            }
        }
    }

    fn emit_metrics(&self) {
        let metrics = self.shared.metrics.get_metrics();

        tracing::info!(
            tick = metrics.current_tick,
            subscribers = metrics.subscribers,
            avg_tick_duration_ns = metrics.avg_tick_duration_ns,
            total_skipped = metrics.total_skipped,
            "Clock metrics"
        );

        // Delivery eating most of the cadence means some subscriber is slow
        let cadence_ns = self.config.tick_cadence().as_nanos() as u64;
        if metrics.p95_tick_duration_ns > cadence_ns / 2 {
            tracing::warn!(
                "Tick delivery is slow: p95 {}ns against a {}ns cadence",
                metrics.p95_tick_duration_ns,
                cadence_ns
            );
        }
    }
}
