//! # qapflow
//!
//! Resource-bounded, session-parallel orchestration of neuroimaging quality
//! assessment (QAP) pipelines.
//!
//! ## Usage
//!
//! ```bash
//! qapflow sublist <site_folder> -o sublist.yml
//! qapflow run config.yml sublist.yml [--strict]
//! ```
//!
//! ## Modules
//!
//! - `aggregation` - Per-unit outcomes and the final metric/failure table
//! - `app` - Logging setup, fatal error reporting and process-level settings
//! - `cli` - Command line parsing and command handlers
//! - `config` - Run configuration loading and validation
//! - `dispatch` - Local worker pool and cluster scheduler dispatchers
//! - `error` - Run-level error type and error codes
//! - `orchestrator` - Resolution, admission, dispatch and collection of a run
//! - `output` - CSV tables, HTML report and execution graph
//! - `pipeline` - The per-unit stage pipeline
//! - `resources` - Processor, session and memory budget with leases
//! - `scan` - NIfTI-1 decoding and in-memory scan volumes
//! - `scoring` - Quality metric computation
//! - `session` - Participant lists and resolution into analysis units
//! - `subprocess` - Process execution abstraction used for external tools
pub mod aggregation;
pub mod app;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod resources;
pub mod scan;
pub mod scoring;
pub mod session;
pub mod subprocess;
