//! Tick-to-value resolution and the adapter task

use std::sync::Arc;

use address_space::{AddressSpace, NodeId, Variant};
use chrono::NaiveDateTime;
use dataset_table::{DatasetTable, ReadingValue};
use serde::{Deserialize, Serialize};
use simulation_clock::{ClockSubscription, ClockTick};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{AdapterConfig, MissPolicy, SourceKind};
use crate::error::AdapterError;
use crate::source::ClockSource;
use crate::stats::{AdapterStats, StatsCollector};

/// Result of resolving one clock tick against a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedValue {
    pub source: SourceKind,
    pub tick: u64,
    /// Virtual time the value was resolved for
    pub timestamp: NaiveDateTime,
    pub value: ReadingValue,
    pub matched: bool,
}

struct AdapterNodes {
    space: AddressSpace,
    value: NodeId,
    time: NodeId,
}

/// Replays one dataset against the simulated clock
pub struct SourceAdapter {
    kind: SourceKind,
    table: Arc<DatasetTable>,
    config: AdapterConfig,
    fallback: ReadingValue,
    current: ReadingValue,
    stats: Arc<StatsCollector>,
    mirror: Option<AdapterNodes>,
}

impl SourceAdapter {
    /// Create an adapter. The fallback must have the same shape as the table's
    /// values, numeric or label.
    pub fn new(
        kind: SourceKind,
        table: Arc<DatasetTable>,
        config: AdapterConfig,
    ) -> Result<Self, AdapterError> {
        let fallback = config.fallback_for(kind);
        if let Some(first) = table.first() {
            if !same_shape(&first.value, &fallback) {
                return Err(AdapterError::Config(format!(
                    "{kind} fallback {fallback} does not match the dataset values"
                )));
            }
        }
        if let ReadingValue::Number(v) = fallback {
            if !v.is_finite() {
                return Err(AdapterError::Config(format!("{kind} fallback must be finite")));
            }
        }

        tracing::info!(
            "Creating {} adapter over {} rows ({:?} key, {:?} misses)",
            kind,
            table.len(),
            table.match_key(),
            config.miss_policy
        );

        Ok(Self {
            kind,
            table,
            current: fallback.clone(),
            fallback,
            config,
            stats: Arc::new(StatsCollector::default()),
            mirror: None,
        })
    }

    /// Expose matched values under the adapter's object in `space`. Adapters
    /// sharing an object share its `Time` variable.
    pub fn attach_address_space(
        &mut self,
        space: &AddressSpace,
        namespace_uri: &str,
    ) -> Result<(), AdapterError> {
        let ns = space.register_namespace(namespace_uri);
        let root = space.objects_folder();
        let object = match space.find_child(root, self.kind.object_name()) {
            Ok(node) => node,
            Err(_) => space.add_object(root, ns, self.kind.object_name())?,
        };
        let value = space.add_variable(object, ns, self.kind.variable_name(), to_variant(&self.fallback))?;
        let time = match space.find_child(object, "Time") {
            Ok(node) => node,
            Err(_) => space.add_variable(object, ns, "Time", "")?,
        };
        self.mirror = Some(AdapterNodes { space: space.clone(), value, time });
        Ok(())
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Value the adapter would report for a miss right now
    pub fn current(&self) -> &ReadingValue {
        &self.current
    }

    pub fn stats(&self) -> AdapterStats {
        self.stats.snapshot()
    }

    /// Shared counters that stay readable after the adapter moves into its task
    pub fn stats_handle(&self) -> Arc<StatsCollector> {
        self.stats.clone()
    }

    /// Resolve a tick against the table
    pub fn resolve(&mut self, tick: &ClockTick) -> ResolvedValue {
        let resolved = match self.table.lookup(tick.timestamp) {
            Some(reading) => {
                let reading = reading.clone();
                self.mirror_value(&reading.value, Some(reading.timestamp));
                self.current = reading.value.clone();
                self.resolved(tick, true)
            }
            None => {
                if self.config.miss_policy == MissPolicy::Zero {
                    self.current = self.fallback.clone();
                    self.mirror_value(&self.fallback, None);
                }
                tracing::warn!(
                    source = %self.kind,
                    tick = tick.tick,
                    "No {} reading for {}, reporting {}",
                    self.kind,
                    tick.timestamp,
                    self.current
                );
                self.resolved(tick, false)
            }
        };

        self.stats.record_tick(tick.tick, resolved.matched);
        resolved
    }

    fn resolved(&self, tick: &ClockTick, matched: bool) -> ResolvedValue {
        ResolvedValue {
            source: self.kind,
            tick: tick.tick,
            timestamp: tick.timestamp,
            value: self.current.clone(),
            matched,
        }
    }

    /// Write `value` to the mirror. The wall time only moves with a matched row.
    fn mirror_value(&self, value: &ReadingValue, matched_at: Option<NaiveDateTime>) {
        if let Some(nodes) = &self.mirror {
            let mut writes = vec![(nodes.value, to_variant(value))];
            if let Some(at) = matched_at {
                writes.push((nodes.time, Variant::String(at.format("%H:%M:%S").to_string())));
            }
            if let Err(e) = nodes.space.write_values(&writes) {
                tracing::warn!("Failed to mirror {} reading: {}", self.kind, e);
            }
        }
    }

    /// Follow `clock` until `cancel` fires, sending one value per tick to `out`.
    ///
    /// A lost clock subscription is re-established with the configured retry
    /// policy. Exhausting the retries stops this adapter with an error; other
    /// adapters are unaffected.
    pub async fn run<C: ClockSource>(
        mut self,
        clock: C,
        out: mpsc::Sender<ResolvedValue>,
        cancel: CancellationToken,
    ) -> Result<(), AdapterError> {
        tracing::info!("Starting {} adapter", self.kind);
        let mut first_subscription = true;

        loop {
            let Some(mut subscription) = self.subscribe(&clock, &cancel).await? else {
                break;
            };
            if !first_subscription {
                self.stats.record_reconnect();
                tracing::info!("{} adapter resubscribed to the clock", self.kind);
            }
            first_subscription = false;

            match self.follow(&mut subscription, &out, &cancel).await {
                Follow::Stop => break,
                Follow::Lost => {
                    tracing::warn!("{} adapter lost its clock subscription", self.kind);
                }
            }
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            "{} adapter stopped after {} ticks ({} matched, {} missed)",
            self.kind,
            stats.ticks_seen,
            stats.matches,
            stats.misses
        );
        Ok(())
    }

    async fn subscribe<C: ClockSource>(
        &self,
        clock: &C,
        cancel: &CancellationToken,
    ) -> Result<Option<ClockSubscription>, AdapterError> {
        let what = format!("{} clock subscription", self.kind);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            result = self.config.retry.retry(&what, || clock.subscribe()) => match result {
                Ok(subscription) => Ok(Some(subscription)),
                Err(e) => {
                    tracing::error!("{} adapter giving up: {}", self.kind, e);
                    Err(e.into())
                }
            },
        }
    }

    async fn follow(
        &mut self,
        subscription: &mut ClockSubscription,
        out: &mpsc::Sender<ResolvedValue>,
        cancel: &CancellationToken,
    ) -> Follow {
        loop {
            let tick = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Follow::Stop,
                tick = subscription.recv() => match tick {
                    Some(tick) => tick,
                    None => return Follow::Lost,
                },
            };

            let resolved = self.resolve(&tick);
            if out.send(resolved).await.is_err() {
                tracing::debug!("{} adapter output closed", self.kind);
                return Follow::Stop;
            }
        }
    }
}

enum Follow {
    Stop,
    Lost,
}

fn same_shape(a: &ReadingValue, b: &ReadingValue) -> bool {
    matches!(
        (a, b),
        (ReadingValue::Number(_), ReadingValue::Number(_)) | (ReadingValue::Label(_), ReadingValue::Label(_))
    )
}

pub(crate) fn to_variant(value: &ReadingValue) -> Variant {
    match value {
        ReadingValue::Number(v) => Variant::Double(*v),
        ReadingValue::Label(s) => Variant::String(s.clone()),
    }
}
