//! Metrics collection for SimulationClock

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics collected by the SimulationClock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockMetrics {
    /// Last emitted tick number
    pub current_tick: u64,

    /// Duration of the last tick (advance + delivery) in nanoseconds
    pub tick_duration_ns: u64,

    /// Current tick rate in Hz
    pub tick_rate_hz: f64,

    /// Number of live subscribers
    pub subscribers: u32,

    /// Subscribers that received the last tick
    pub last_delivered: u32,

    /// Subscribers skipped on the last tick because their buffer stayed full
    pub last_skipped: u32,

    /// Average tick duration in nanoseconds
    pub avg_tick_duration_ns: u64,

    /// Maximum tick duration in nanoseconds
    pub max_tick_duration_ns: u64,

    /// 95th percentile tick duration in nanoseconds
    pub p95_tick_duration_ns: u64,

    /// 99th percentile tick duration in nanoseconds
    pub p99_tick_duration_ns: u64,

    /// Clock uptime in seconds
    pub uptime_seconds: u64,

    /// Total ticks emitted
    pub total_ticks: u64,

    /// Total tick deliveries across all subscribers
    pub total_deliveries: u64,

    /// Total skipped deliveries
    pub total_skipped: u64,
}

/// Metrics collector for the SimulationClock
pub struct MetricsCollector {
    // Tick metrics
    current_tick: AtomicU64,
    tick_durations: Vec<AtomicU64>,
    max_tick_duration: AtomicU64,
    total_ticks: AtomicU64,

    // Delivery metrics
    subscribers: AtomicU64,
    last_delivered: AtomicU64,
    last_skipped: AtomicU64,
    total_deliveries: AtomicU64,
    total_skipped: AtomicU64,

    // Timing
    start_time: Instant,

    // Configuration
    history_size: usize,
}

impl MetricsCollector {
    /// Create a new metrics collector keeping `history_size` tick durations
    pub fn new(history_size: usize) -> Self {
        let history_size = history_size.max(1);
        let tick_durations = (0..history_size).map(|_| AtomicU64::new(0)).collect();

        Self {
            current_tick: AtomicU64::new(0),
            tick_durations,
            max_tick_duration: AtomicU64::new(0),
            total_ticks: AtomicU64::new(0),
            subscribers: AtomicU64::new(0),
            last_delivered: AtomicU64::new(0),
            last_skipped: AtomicU64::new(0),
            total_deliveries: AtomicU64::new(0),
            total_skipped: AtomicU64::new(0),
            start_time: Instant::now(),
            history_size,
        }
    }

    /// Record a completed tick
    pub fn record_tick(&self, tick: u64, duration: Duration, delivered: u32, skipped: u32) {
        let duration_ns = duration.as_nanos() as u64;
        let index = (tick as usize) % self.history_size;

        self.current_tick.store(tick, Ordering::Relaxed);
        self.tick_durations[index].store(duration_ns, Ordering::Relaxed);
        self.total_ticks.fetch_add(1, Ordering::Relaxed);
        self.last_delivered.store(delivered as u64, Ordering::Relaxed);
        self.last_skipped.store(skipped as u64, Ordering::Relaxed);
        self.total_deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        self.total_skipped.fetch_add(skipped as u64, Ordering::Relaxed);

        self.max_tick_duration.fetch_max(duration_ns, Ordering::Relaxed);
    }

    /// Update live subscriber count
    pub fn update_subscribers(&self, count: usize) {
        self.subscribers.store(count as u64, Ordering::Relaxed);
    }

    /// Get current metrics
    pub fn get_metrics(&self) -> ClockMetrics {
        let current_tick = self.current_tick.load(Ordering::Relaxed);
        let uptime = self.start_time.elapsed().as_secs();
        let total_ticks = self.total_ticks.load(Ordering::Relaxed);

        let tick_rate_hz = if uptime > 0 { total_ticks as f64 / uptime as f64 } else { 0.0 };

        let last_index = (current_tick as usize) % self.history_size;
        let tick_duration_ns = self.tick_durations[last_index].load(Ordering::Relaxed);

        let mut durations: Vec<u64> = self
            .tick_durations
            .iter()
            .map(|d| d.load(Ordering::Relaxed))
            .filter(|&d| d > 0)
            .collect();
        durations.sort_unstable();

        let avg_tick_duration_ns = if durations.is_empty() {
            0
        } else {
            durations.iter().sum::<u64>() / durations.len() as u64
        };

        ClockMetrics {
            current_tick,
            tick_duration_ns,
            tick_rate_hz,
            subscribers: self.subscribers.load(Ordering::Relaxed) as u32,
            last_delivered: self.last_delivered.load(Ordering::Relaxed) as u32,
            last_skipped: self.last_skipped.load(Ordering::Relaxed) as u32,
            avg_tick_duration_ns,
            max_tick_duration_ns: self.max_tick_duration.load(Ordering::Relaxed),
            p95_tick_duration_ns: percentile(&durations, 0.95),
            p99_tick_duration_ns: percentile(&durations, 0.99),
            uptime_seconds: uptime,
            total_ticks,
            total_deliveries: self.total_deliveries.load(Ordering::Relaxed),
            total_skipped: self.total_skipped.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.current_tick.store(0, Ordering::Relaxed);
        self.max_tick_duration.store(0, Ordering::Relaxed);
        self.total_ticks.store(0, Ordering::Relaxed);
        self.last_delivered.store(0, Ordering::Relaxed);
        self.last_skipped.store(0, Ordering::Relaxed);
        self.total_deliveries.store(0, Ordering::Relaxed);
        self.total_skipped.store(0, Ordering::Relaxed);

        for duration in self.tick_durations.iter() {
            duration.store(0, Ordering::Relaxed);
        }
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = (sorted.len() as f64 * p) as usize;
    sorted[index.min(sorted.len() - 1)]
}
