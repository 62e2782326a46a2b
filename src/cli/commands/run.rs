//! `qapflow run`

use crate::app::AppConfig;
use crate::config::load_run_config;
use crate::error::QapError;
use crate::orchestrator::{Orchestrator, RunCancellation, RunOptions};
use crate::session::ParticipantList;
use crate::subprocess::production_runner;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

pub async fn run_qap_command(config_path: &Path, sublist: &Path, app: &AppConfig) -> Result<i32> {
    let config = load_run_config(config_path).await?;
    let path = sublist.to_path_buf();
    let list = tokio::task::spawn_blocking(move || ParticipantList::load(&path))
        .await
        .context("participant list reader stopped")??;

    let cancellation = RunCancellation::new();
    if let Err(e) = cancellation.install_signal_handlers() {
        warn!("Interrupts will not stop the run cleanly: {}", e);
    }

    let orchestrator = Orchestrator::from_config(config, production_runner())?
        .with_options(RunOptions {
            strict: app.strict,
            progress: app.progress,
        })
        .with_cancellation(cancellation);
    let report = orchestrator.run(Arc::new(list)).await?;

    println!(
        "{} unit(s) scored, {} failed",
        report.records, report.failures
    );
    for failure in &report.table.failures {
        println!("  {}", failure);
    }
    for output in &report.outputs {
        println!("Wrote {}", output.display());
    }

    if report.cancelled {
        return Err(QapError::cancelled(format!(
            "{} of {} unit(s) were not started",
            report.not_started(),
            report.resolved
        ))
        .into());
    }
    Ok(report.exit_code(app.strict))
}
