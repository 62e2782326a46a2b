/// Failure to run a program at all; a program that ran and failed is a
/// [`ProcessOutput`](super::ProcessOutput) with a non-success status
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("program not found: {0}")]
    CommandNotFound(String),

    #[error("cannot start '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error talking to child process: {0}")]
    Io(#[from] std::io::Error),

    #[error("mock expectation not met: {0}")]
    MockExpectationNotMet(String),
}

impl ProcessError {
    /// Whether retrying the same command might succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessError::Io(_) | ProcessError::SpawnFailed { .. })
    }
}
