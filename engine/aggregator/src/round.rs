//! Synchronization round for a single virtual timestamp

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use source_adapter::{ResolvedValue, SourceKind};
use tokio::time::Instant;

pub(crate) struct Round {
    pub(crate) tick: u64,
    pub(crate) timestamp: NaiveDateTime,
    pub(crate) deadline: Instant,
    pub(crate) values: BTreeMap<SourceKind, ResolvedValue>,
}

impl Round {
    pub(crate) fn new(tick: u64, timestamp: NaiveDateTime, deadline: Instant) -> Self {
        Self { tick, timestamp, deadline, values: BTreeMap::new() }
    }

    /// Store a value unless the source already reported. Returns whether it
    /// was stored.
    pub(crate) fn offer(&mut self, value: ResolvedValue) -> bool {
        if self.values.contains_key(&value.source) {
            return false;
        }
        self.values.insert(value.source, value);
        true
    }

    pub(crate) fn is_complete(&self, sources: &BTreeSet<SourceKind>) -> bool {
        sources.iter().all(|s| self.values.contains_key(s))
    }

    pub(crate) fn missing<'a>(&'a self, sources: &'a BTreeSet<SourceKind>) -> impl Iterator<Item = SourceKind> + 'a {
        sources.iter().copied().filter(|s| !self.values.contains_key(s))
    }
}
