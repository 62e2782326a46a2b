//! Run configuration
//!
//! The configuration document is read once at startup, normalized and then
//! shared read-only as an `Arc<RunConfig>`.

pub mod loader;
pub mod run_config;

pub use loader::load_run_config;
pub use run_config::{ClusterPolicy, ClusterSystem, OutputFlags, RawConfig, RunConfig};

#[cfg(test)]
mod tests;
