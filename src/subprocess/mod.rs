//! External process execution
//!
//! Scorer programs and cluster scheduler commands are run through the
//! [`ProcessRunner`] trait so tests can substitute [`MockProcessRunner`].

pub mod builder;
pub mod error;
pub mod mock;
pub mod runner;

#[cfg(test)]
mod tests;

pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use mock::{MockCommandConfig, MockProcessRunner};
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};

use std::sync::Arc;

/// The runner used outside of tests
pub fn production_runner() -> Arc<dyn ProcessRunner> {
    Arc::new(TokioProcessRunner)
}
