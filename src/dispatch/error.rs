use crate::aggregation::FailureKind;
use std::path::PathBuf;
use std::time::Duration;

/// Failure to execute a unit, as opposed to a failure inside its pipeline
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("job submission failed: {0}")]
    Submission(String),

    #[error("polling job {job_id} failed: {message}")]
    Poll { job_id: String, message: String },

    #[error("job finished without writing {}: {message}", path.display())]
    MissingOutcome { path: PathBuf, message: String },

    #[error("unit exceeded its time limit of {0:?}")]
    Timeout(Duration),

    #[error("unit crashed: {0}")]
    Crashed(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<DispatchError>,
    },
}

impl DispatchError {
    /// Whether the same operation may succeed if tried again
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Submission(_) | DispatchError::Poll { .. })
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            DispatchError::Timeout(_) => FailureKind::Timeout,
            DispatchError::Crashed(_) | DispatchError::MissingOutcome { .. } => FailureKind::Crash,
            DispatchError::Submission(_)
            | DispatchError::Poll { .. }
            | DispatchError::RetriesExhausted { .. } => FailureKind::DispatchError,
        }
    }
}
