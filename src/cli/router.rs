//! Command routing and execution

use crate::app::AppConfig;
use crate::cli::args::Commands;
use crate::cli::commands::*;
use anyhow::Result;

/// Execute a CLI command, returning the process exit status
pub async fn execute_command(command: Commands, verbose: u8) -> Result<i32> {
    match command {
        Commands::Run {
            config,
            sublist,
            strict,
            no_progress,
        } => {
            let app = AppConfig::new(verbose)
                .with_strict(strict)
                .with_progress(!no_progress);
            run_qap_command(&config, &sublist, &app).await
        }
        Commands::Sublist {
            site_folder,
            output,
            include,
        } => {
            run_sublist_command(&site_folder, output.as_deref(), include.as_deref()).await?;
            Ok(0)
        }
        Commands::RunUnit { request, outcome } => {
            run_unit_command(&request, &outcome).await?;
            Ok(0)
        }
    }
}
