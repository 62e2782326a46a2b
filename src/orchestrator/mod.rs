//! Run orchestration
//!
//! ```text
//! resolve ──▶ acquire lease ──▶ register ──▶ spawn dispatch ──▶ record
//!                  ▲                                              │
//!                  └────────────── lease dropped ◀────────────────┘
//! ```
//!
//! Units are resolved up front, so a bad participant list aborts the run
//! before anything executes. Admission then follows resolution order and is
//! gated only by the budget. The final table is produced once every admitted
//! unit has reported.

pub mod cancellation;


pub use cancellation::RunCancellation;

use crate::aggregation::{AggregateTable, FailureKind, ResultAggregator, UnitOutcome};
use crate::config::RunConfig;
use crate::dispatch::{dispatcher_for, Dispatcher};
use crate::error::Result;
use crate::output::OutputSink;
use crate::resources::BudgetManager;
use crate::session::{ParticipantList, SessionResolver, UnitDefaults};
use crate::subprocess::ProcessRunner;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::IsTerminal;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Any failure record makes the run exit non-zero
    pub strict: bool,
    pub progress: bool,
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub resolved: usize,
    pub admitted: usize,
    pub records: usize,
    pub failures: usize,
    pub cancelled: bool,
    pub outputs: Vec<PathBuf>,
    #[serde(skip)]
    pub table: AggregateTable,
}

impl RunReport {
    /// Units that were resolved but never started
    pub fn not_started(&self) -> usize {
        self.resolved - self.admitted
    }

    pub fn exit_code(&self, strict: bool) -> i32 {
        if self.cancelled {
            130
        } else if strict && self.failures > 0 {
            3
        } else {
            0
        }
    }
}

pub struct Orchestrator {
    config: Arc<RunConfig>,
    budget: BudgetManager,
    dispatcher: Arc<dyn Dispatcher>,
    aggregator: ResultAggregator,
    sink: OutputSink,
    cancellation: RunCancellation,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(config: Arc<RunConfig>, dispatcher: Arc<dyn Dispatcher>, sink: OutputSink) -> Self {
        Self {
            budget: BudgetManager::from_config(&config),
            config,
            dispatcher,
            aggregator: ResultAggregator::new(),
            sink,
            cancellation: RunCancellation::new(),
            options: RunOptions::default(),
        }
    }

    /// Orchestrator with the dispatcher and sink the configuration asks for
    pub fn from_config(config: Arc<RunConfig>, processes: Arc<dyn ProcessRunner>) -> Result<Self> {
        let dispatcher = dispatcher_for(config.clone(), processes);
        Ok(Self::new(config, dispatcher, OutputSink::with_defaults()?))
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, cancellation: RunCancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn cancellation(&self) -> &RunCancellation {
        &self.cancellation
    }

    pub fn budget(&self) -> &BudgetManager {
        &self.budget
    }

    pub fn aggregator(&self) -> &ResultAggregator {
        &self.aggregator
    }

    pub async fn run(&self, list: Arc<ParticipantList>) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            "Starting run {} ({}) with {} dispatch",
            self.config.run_name,
            run_id,
            self.dispatcher.name()
        );

        let resolver = SessionResolver::new(list, UnitDefaults::from_config(&self.config));
        let units = resolver.resolve_all()?;
        let resolved = units.len();
        let request = self.budget.unit_request();
        info!("Resolved {} unit(s), each leasing {}", resolved, request);

        let progress = self.progress_bar(resolved);
        let mut running = JoinSet::new();
        let mut admitted = 0;

        for unit in units {
            if self.cancellation.is_cancelled() {
                break;
            }
            let lease = tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => break,
                lease = self.budget.acquire(request) => lease?,
            };
            debug!("Admitted {} with {:?}", unit.key, lease);
            self.aggregator.register(unit.key.clone()).await;

            let dispatcher = self.dispatcher.clone();
            let aggregator = self.aggregator.clone();
            let progress = progress.clone();
            running.spawn(async move {
                let fallback = unit.clone();
                let outcome = AssertUnwindSafe(dispatcher.dispatch(unit, lease))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        let message = crate::dispatch::local::panic_message(panic);
                        UnitOutcome::failure(&fallback, FailureKind::Crash, message)
                    });
                if let UnitOutcome::Failure(record) = &outcome {
                    progress.println(format!("failed: {}", record));
                }
                aggregator.record(outcome).await;
                progress.inc(1);
            });
            admitted += 1;
        }

        let cancelled = self.cancellation.is_cancelled();
        if cancelled {
            warn!(
                "Run cancelled: {} of {} unit(s) were not started, waiting for {} running",
                resolved - admitted,
                resolved,
                running.len()
            );
        }

        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                error!("Unit task failed outside its pipeline: {}", e);
            }
        }
        progress.finish_and_clear();

        let usage = self.budget.snapshot();
        debug!(
            "Peak usage: {} slot(s), {} MB, {} concurrent unit(s)",
            usage.peak_slots, usage.peak_memory_mb, usage.peak_leases
        );

        let table = self.aggregator.finalize().await?;
        let outputs = self.sink.emit(&table, &self.config).await?;

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            resolved,
            admitted,
            records: table.total_records(),
            failures: table.total_failures(),
            cancelled,
            outputs,
            table,
        };
        info!(
            "Run {} finished in {}s: {} scored, {} failed",
            run_id,
            (report.finished_at - report.started_at).num_seconds(),
            report.records,
            report.failures
        );
        Ok(report)
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.options.progress || !std::io::stderr().is_terminal() {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        ) {
            bar.set_style(style.progress_chars("█▓▒░ "));
        }
        bar
    }
}
