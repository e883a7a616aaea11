//! Per-timestamp barrier and the aggregator task

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDateTime;
use simulation_clock::{ClockSubscription, ClockTick};
use source_adapter::{ResolvedValue, SourceKind};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::AggregatorConfig;
use crate::error::AggregatorError;
use crate::record::{evaluate_alert, ConsolidatedRecord};
use crate::round::Round;

/// Aggregator statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub rounds_completed: u64,
    pub sync_timeouts: u64,
    pub late_values: u64,
    pub duplicate_values: u64,
    pub alert_transitions: u64,
    pub alert: bool,
}

/// Holds the current consolidated record and the rounds still waiting for
/// values.
///
/// The synchronous methods ([`on_tick`](Self::on_tick),
/// [`on_value`](Self::on_value), [`expire`](Self::expire)) contain all the
/// logic; [`run`](Self::run) only feeds them from channels.
pub struct Aggregator {
    config: AggregatorConfig,
    sources: BTreeSet<SourceKind>,
    rounds: BTreeMap<NaiveDateTime, Round>,
    /// Latest finalized timestamp; anything at or before it is late
    horizon: Option<NaiveDateTime>,
    current: Option<Arc<ConsolidatedRecord>>,
    stats: AggregatorStats,
}

impl Aggregator {
    /// Create an aggregator waiting on `sources`. Rainfall and discharge are
    /// required since the alert depends on both.
    pub fn new(
        config: AggregatorConfig,
        sources: impl IntoIterator<Item = SourceKind>,
    ) -> Result<Self, AggregatorError> {
        config.validate()?;
        let sources: BTreeSet<SourceKind> = sources.into_iter().collect();
        for required in [SourceKind::Rainfall, SourceKind::Discharge] {
            if !sources.contains(&required) {
                return Err(AggregatorError::MissingSource(required));
            }
        }

        tracing::info!(
            "Creating Aggregator for {:?} (rain > {} mm/h or flow > {} m3/s, sync timeout {:?})",
            sources,
            config.thresholds.rainfall_mm_h,
            config.thresholds.discharge_m3_s,
            config.sync_timeout()
        );

        Ok(Self {
            config,
            sources,
            rounds: BTreeMap::new(),
            horizon: None,
            current: None,
            stats: AggregatorStats::default(),
        })
    }

    /// Latest consolidated record, `None` until the first round completes
    pub fn current(&self) -> Option<Arc<ConsolidatedRecord>> {
        self.current.clone()
    }

    pub fn stats(&self) -> AggregatorStats {
        self.stats.clone()
    }

    /// Number of rounds still waiting for values
    pub fn pending_rounds(&self) -> usize {
        self.rounds.len()
    }

    /// Earliest deadline among open rounds
    pub fn next_deadline(&self) -> Option<Instant> {
        self.rounds.values().map(|r| r.deadline).min()
    }

    /// A clock tick opens the round for its timestamp
    pub fn on_tick(&mut self, tick: &ClockTick, now: Instant) {
        if self.is_late(tick.timestamp) {
            return;
        }
        open_round(&mut self.rounds, self.config.sync_timeout(), tick.tick, tick.timestamp, now);
    }

    /// Accept a value. Returns the new record when this value completes its
    /// round.
    pub fn on_value(&mut self, value: ResolvedValue, now: Instant) -> Option<Arc<ConsolidatedRecord>> {
        if !self.sources.contains(&value.source) {
            tracing::debug!("Ignoring value from unregistered source {}", value.source);
            return None;
        }
        if self.is_late(value.timestamp) {
            self.stats.late_values += 1;
            tracing::warn!(
                source = %value.source,
                tick = value.tick,
                "Discarding late {} value for {}",
                value.source,
                value.timestamp
            );
            return None;
        }

        let timestamp = value.timestamp;
        let source = value.source;
        let round = open_round(&mut self.rounds, self.config.sync_timeout(), value.tick, timestamp, now);
        if !round.offer(value) {
            self.stats.duplicate_values += 1;
            tracing::debug!("Duplicate {} value for {} ignored", source, timestamp);
            return None;
        }
        if !round.is_complete(&self.sources) {
            return None;
        }

        let round = self.rounds.remove(&timestamp)?;
        Some(self.finalize(round))
    }

    /// Drop rounds whose deadline has passed. The previous record stays
    /// current. Returns the number of rounds dropped.
    pub fn expire(&mut self, now: Instant) -> usize {
        let expired: Vec<NaiveDateTime> =
            self.rounds.values().filter(|r| r.deadline <= now).map(|r| r.timestamp).collect();
        for timestamp in &expired {
            if let Some(round) = self.rounds.remove(timestamp) {
                self.time_out(&round);
                self.advance_horizon(round.timestamp);
            }
        }
        expired.len()
    }

    fn is_late(&self, timestamp: NaiveDateTime) -> bool {
        self.horizon.is_some_and(|h| timestamp <= h)
    }

    fn advance_horizon(&mut self, timestamp: NaiveDateTime) {
        if self.horizon.map_or(true, |h| timestamp > h) {
            self.horizon = Some(timestamp);
        }
    }

    fn time_out(&mut self, round: &Round) {
        self.stats.sync_timeouts += 1;
        let missing: Vec<String> = round.missing(&self.sources).map(|s| s.to_string()).collect();
        tracing::warn!(
            tick = round.tick,
            "Sync timeout for {}: no value from {}; holding previous record",
            round.timestamp,
            missing.join(", ")
        );
    }

    fn finalize(&mut self, round: Round) -> Arc<ConsolidatedRecord> {
        // Older rounds can no longer publish without breaking timestamp order
        let stale: Vec<NaiveDateTime> = self.rounds.range(..round.timestamp).map(|(ts, _)| *ts).collect();
        for timestamp in stale {
            if let Some(old) = self.rounds.remove(&timestamp) {
                self.time_out(&old);
            }
        }
        self.advance_horizon(round.timestamp);

        let number = |kind: SourceKind| -> f64 {
            let value = round.values.get(&kind).and_then(|v| v.value.as_f64());
            value.unwrap_or_else(|| {
                tracing::warn!("{} value for {} is not numeric, using 0", kind, round.timestamp);
                0.0
            })
        };
        let rainfall = number(SourceKind::Rainfall);
        let discharge = number(SourceKind::Discharge);
        let alert = evaluate_alert(rainfall, discharge, &self.config.thresholds);
        let station_status = round.values.get(&SourceKind::StationStatus).map(|v| v.value.to_string());

        let record = Arc::new(ConsolidatedRecord {
            tick: round.tick,
            timestamp: round.timestamp,
            rainfall,
            discharge,
            alert,
            station_status,
        });

        let previous_alert = self.current.as_ref().map(|r| r.alert);
        if previous_alert.is_some_and(|prev| prev != alert) || (previous_alert.is_none() && alert) {
            self.stats.alert_transitions += 1;
            if alert {
                tracing::warn!(
                    "ALERT raised at {}: rainfall {} mm/h, discharge {} m3/s",
                    record.timestamp,
                    rainfall,
                    discharge
                );
            } else {
                tracing::info!("Alert cleared at {}", record.timestamp);
            }
        }

        self.stats.rounds_completed += 1;
        self.stats.alert = alert;
        self.current = Some(record.clone());
        tracing::debug!(
            tick = record.tick,
            timestamp = %record.timestamp,
            rainfall,
            discharge,
            alert,
            "Consolidated record updated"
        );
        record
    }

    /// Run until `cancel` fires or every value sender is gone. Completed
    /// records are sent to `out` in timestamp order. Returns the final stats.
    pub async fn run(
        mut self,
        mut clock: Option<ClockSubscription>,
        mut values: mpsc::Receiver<ResolvedValue>,
        out: mpsc::Sender<Arc<ConsolidatedRecord>>,
        cancel: CancellationToken,
    ) -> AggregatorStats {
        tracing::info!("Starting Aggregator");

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep_until(deadline) => {
                    self.expire(Instant::now());
                }
                tick = next_tick(&mut clock) => match tick {
                    Some(tick) => self.on_tick(&tick, Instant::now()),
                    None => {
                        tracing::debug!("Aggregator clock subscription closed");
                        clock = None;
                    }
                },
                value = values.recv() => match value {
                    Some(value) => {
                        if let Some(record) = self.on_value(value, Instant::now()) {
                            if out.send(record).await.is_err() {
                                tracing::debug!("Aggregator output closed");
                                break;
                            }
                        }
                    }
                    None => break,
                },
            }
        }

        tracing::info!(
            "Aggregator stopped: {} rounds, {} sync timeouts, {} late values",
            self.stats.rounds_completed,
            self.stats.sync_timeouts,
            self.stats.late_values
        );
        self.stats
    }
}

fn open_round(
    rounds: &mut BTreeMap<NaiveDateTime, Round>,
    sync_timeout: std::time::Duration,
    tick: u64,
    timestamp: NaiveDateTime,
    now: Instant,
) -> &mut Round {
    rounds.entry(timestamp).or_insert_with(|| Round::new(tick, timestamp, now + sync_timeout))
}

async fn next_tick(clock: &mut Option<ClockSubscription>) -> Option<ClockTick> {
    match clock {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
