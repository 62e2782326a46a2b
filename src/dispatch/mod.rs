//! Execution dispatch
//!
//! A [`Dispatcher`] takes an admitted unit together with its lease and
//! returns exactly one outcome. Failures of the unit, whatever their cause,
//! come back as failure records so sibling units are never affected.

pub mod cluster;
pub mod error;
pub mod local;
pub mod retry;


pub use cluster::{
    run_unit_request, ClusterBackend, ClusterDispatcher, JobSpec, JobState, SchedulerBackend,
    UnitRequest,
};
pub use error::DispatchError;
pub use local::LocalDispatcher;
pub use retry::{RetryConfig, RetryExecutor};

use crate::aggregation::UnitOutcome;
use crate::config::RunConfig;
use crate::pipeline::UnitRunner;
use crate::resources::ResourceLease;
use crate::session::AnalysisUnit;
use crate::subprocess::ProcessRunner;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn name(&self) -> &str;

    /// Execute `unit` while holding `lease`; the lease is released on return
    async fn dispatch(&self, unit: AnalysisUnit, lease: ResourceLease) -> UnitOutcome;
}

/// Dispatcher for the configured cluster system
pub fn dispatcher_for(
    config: Arc<RunConfig>,
    processes: Arc<dyn ProcessRunner>,
) -> Arc<dyn Dispatcher> {
    if config.cluster_system.is_local() {
        let runner = UnitRunner::from_config(config.clone(), processes);
        Arc::new(LocalDispatcher::new(runner, config.num_processors))
    } else {
        let backend = SchedulerBackend::new(config.cluster_system, processes);
        Arc::new(ClusterDispatcher::new(config, Arc::new(backend)))
    }
}

/// Failure outcome for a unit that could not be executed
pub(crate) fn dispatch_failure(unit: &AnalysisUnit, error: &DispatchError) -> UnitOutcome {
    UnitOutcome::failure(unit, error.kind(), error.to_string())
}
