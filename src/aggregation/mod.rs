//! Per-unit outcomes and their consolidation into the final table

pub mod aggregator;
pub mod outcome;

pub use aggregator::{AggregateTable, ResultAggregator};
pub use outcome::{FailureKind, FailureRecord, MetricRecord, UnitOutcome};
