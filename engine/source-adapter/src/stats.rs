//! Adapter counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of an adapter's counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterStats {
    pub ticks_seen: u64,
    pub matches: u64,
    pub misses: u64,
    pub reconnects: u64,
    pub last_tick: u64,
}

/// Lock-free counters shared between the adapter task and observers
#[derive(Debug, Default)]
pub struct StatsCollector {
    ticks_seen: AtomicU64,
    matches: AtomicU64,
    misses: AtomicU64,
    reconnects: AtomicU64,
    last_tick: AtomicU64,
}

impl StatsCollector {
    pub fn record_tick(&self, tick: u64, matched: bool) {
        self.ticks_seen.fetch_add(1, Ordering::Relaxed);
        self.last_tick.store(tick, Ordering::Relaxed);
        if matched {
            self.matches.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AdapterStats {
        AdapterStats {
            ticks_seen: self.ticks_seen.load(Ordering::Relaxed),
            matches: self.matches.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            last_tick: self.last_tick.load(Ordering::Relaxed),
        }
    }
}
