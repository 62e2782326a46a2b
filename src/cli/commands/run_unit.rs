//! `qapflow run-unit`

use crate::dispatch::run_unit_request;
use crate::subprocess::production_runner;
use anyhow::Result;
use std::path::Path;
use tracing::info;

/// Run one unit for a cluster job. A failed unit still exits 0: its failure
/// record is the outcome.
pub async fn run_unit_command(request: &Path, outcome: &Path) -> Result<()> {
    let result = run_unit_request(request, outcome, production_runner()).await?;
    info!(
        "{} finished ({}), outcome written to {}",
        result.key(),
        if result.is_success() { "scored" } else { "failed" },
        outcome.display()
    );
    Ok(())
}
