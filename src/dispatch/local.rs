//! Local worker pool

use super::{dispatch_failure, DispatchError, Dispatcher};
use crate::aggregation::UnitOutcome;
use crate::pipeline::UnitRunner;
use crate::resources::ResourceLease;
use crate::session::AnalysisUnit;
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, warn};

/// Runs units in tokio tasks, at most `workers` at a time
pub struct LocalDispatcher {
    runner: UnitRunner,
    workers: Arc<Semaphore>,
    timeout: Option<Duration>,
}

impl LocalDispatcher {
    pub fn new(runner: UnitRunner, workers: usize) -> Self {
        let timeout = runner.config().unit_timeout;
        Self {
            runner,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    async fn execute(&self, unit: &AnalysisUnit) -> Result<UnitOutcome, DispatchError> {
        let runner = self.runner.clone();
        let task_unit = unit.clone();
        let mut handle = tokio::spawn(async move { runner.run(task_unit).await });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    // Wait for the abort so the unit's I/O stops before the lease is freed
                    let _ = handle.await;
                    return Err(DispatchError::Timeout(limit));
                }
            },
            None => handle.await,
        };

        joined.map_err(crash)
    }
}

fn crash(error: JoinError) -> DispatchError {
    if error.is_panic() {
        DispatchError::Crashed(panic_message(error.into_panic()))
    } else {
        DispatchError::Crashed("unit task was cancelled".to_string())
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unit panicked".to_string()
    }
}

#[async_trait]
impl Dispatcher for LocalDispatcher {
    fn name(&self) -> &str {
        "local"
    }

    async fn dispatch(&self, unit: AnalysisUnit, lease: ResourceLease) -> UnitOutcome {
        let _permit = match self.workers.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                let error = DispatchError::Crashed("worker pool is closed".to_string());
                return dispatch_failure(&unit, &error);
            }
        };
        debug!("Running {} locally with {:?}", unit.key, lease);

        let outcome = match self.execute(&unit).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!("{} failed: {}", unit.key, error);
                dispatch_failure(&unit, &error)
            }
        };
        drop(lease);
        outcome
    }
}
