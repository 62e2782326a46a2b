//! CLI argument structures

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Run neuroimaging quality-assessment pipelines under fixed resource budgets
#[derive(Parser)]
#[command(name = "qapflow")]
#[command(about = "qapflow - resource-bounded QAP pipeline orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Score every scan of a participant list
    #[command(name = "run")]
    Run {
        /// Run configuration document
        config: PathBuf,

        /// Participant list
        sublist: PathBuf,

        /// Exit with status 3 when any unit failed
        #[arg(long)]
        strict: bool,

        /// Do not draw a progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Build a participant list from a raw data directory
    #[command(name = "sublist")]
    Sublist {
        /// Directory laid out as <site>/<subject>/<session>/<scan>/<file>.nii[.gz]
        site_folder: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// File with one subject id per line to keep
        #[arg(long, value_name = "FILE")]
        include: Option<PathBuf>,
    },

    /// Execute a single unit request (cluster job entry point)
    #[command(name = "run-unit")]
    RunUnit {
        /// Serialized unit request
        #[arg(long)]
        request: PathBuf,

        /// Where to write the unit outcome
        #[arg(long)]
        outcome: PathBuf,
    },
}
