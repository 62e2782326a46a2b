//! Result aggregation
//!
//! The aggregator is the single owner of per-unit outcomes. Insertion is
//! keyed by [`UnitKey`], so recording a unit twice replaces its earlier
//! outcome, and the final table is ordered by key regardless of the order in
//! which units completed.

use super::outcome::{FailureRecord, MetricRecord, UnitOutcome};
use crate::error::{QapError, Result};
use crate::session::{ScanKind, UnitKey};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Final ordered results of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateTable {
    pub anatomical: Vec<MetricRecord>,
    pub functional: Vec<MetricRecord>,
    pub failures: Vec<FailureRecord>,
}

impl AggregateTable {
    fn from_outcomes(outcomes: &BTreeMap<UnitKey, UnitOutcome>) -> Self {
        let mut table = AggregateTable::default();
        for outcome in outcomes.values() {
            match outcome {
                UnitOutcome::Metrics(record) => match record.kind() {
                    ScanKind::Anatomical => table.anatomical.push(record.clone()),
                    ScanKind::Functional => table.functional.push(record.clone()),
                },
                UnitOutcome::Failure(record) => table.failures.push(record.clone()),
            }
        }
        table
    }

    pub fn records(&self, kind: ScanKind) -> &[MetricRecord] {
        match kind {
            ScanKind::Anatomical => &self.anatomical,
            ScanKind::Functional => &self.functional,
        }
    }

    pub fn failures(&self, kind: ScanKind) -> impl Iterator<Item = &FailureRecord> {
        self.failures.iter().filter(move |f| f.key.kind == kind)
    }

    /// Sorted union of the metric names reported for `kind`
    pub fn metric_names(&self, kind: ScanKind) -> Vec<String> {
        self.records(kind)
            .iter()
            .flat_map(|r| r.metrics.keys())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn total_records(&self) -> usize {
        self.anatomical.len() + self.functional.len()
    }

    pub fn total_failures(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_records() == 0 && self.failures.is_empty()
    }
}

#[derive(Default)]
struct AggregatorState {
    registered: BTreeSet<UnitKey>,
    outcomes: BTreeMap<UnitKey, UnitOutcome>,
    finalized: bool,
}

/// Thread-safe collector of unit outcomes
#[derive(Clone, Default)]
pub struct ResultAggregator {
    state: Arc<RwLock<AggregatorState>>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a unit as dispatched; it must report before the table can be finalized
    pub async fn register(&self, key: UnitKey) {
        let mut state = self.state.write().await;
        state.registered.insert(key);
    }

    /// Insert an outcome, replacing any earlier outcome for the same unit
    pub async fn record(&self, outcome: UnitOutcome) {
        let mut state = self.state.write().await;
        if state.finalized {
            warn!(
                "Ignoring outcome for {} received after the table was finalized",
                outcome.key()
            );
            return;
        }
        let key = outcome.key().clone();
        state.registered.insert(key.clone());
        if state.outcomes.insert(key.clone(), outcome).is_some() {
            debug!("Replaced earlier outcome for {}", key);
        }
    }

    /// Units registered but not yet reported
    pub async fn missing(&self) -> Vec<UnitKey> {
        let state = self.state.read().await;
        state
            .registered
            .iter()
            .filter(|k| !state.outcomes.contains_key(*k))
            .cloned()
            .collect()
    }

    /// `(reported, registered)` counts
    pub async fn progress(&self) -> (usize, usize) {
        let state = self.state.read().await;
        (state.outcomes.len(), state.registered.len())
    }

    /// Produce the final table.
    ///
    /// Fails with an incomplete-run error while any registered unit has not
    /// reported. Once it succeeds the aggregator is read-only and further
    /// calls return the same table.
    pub async fn finalize(&self) -> Result<AggregateTable> {
        let mut state = self.state.write().await;
        let missing: Vec<String> = state
            .registered
            .iter()
            .filter(|k| !state.outcomes.contains_key(*k))
            .map(|k| k.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(QapError::incomplete(missing));
        }
        state.finalized = true;
        Ok(AggregateTable::from_outcomes(&state.outcomes))
    }
}
