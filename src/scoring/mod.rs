//! Quality scoring seam
//!
//! The pipeline treats metric computation as opaque: a [`QualityScorer`]
//! receives a trimmed volume and returns named metrics plus optional
//! intermediate volumes. The built-in [`SummaryScorer`] computes simple
//! intensity statistics; [`CommandScorer`] delegates to an external program.

pub mod command;
pub mod summary;

pub use command::CommandScorer;
pub use summary::SummaryScorer;

use crate::config::RunConfig;
use crate::scan::{ScanError, ScanVolume};
use crate::session::AnalysisUnit;
use crate::subprocess::{ProcessError, ProcessRunner};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Everything a scorer may look at for one unit
#[derive(Debug, Clone, Copy)]
pub struct ScoreRequest<'a> {
    pub unit: &'a AnalysisUnit,
    pub volume: &'a ScanVolume,
    pub exclude_zeros: bool,
    pub template: Option<&'a Path>,
}

/// Metrics and intermediate volumes produced by a scorer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreOutput {
    pub metrics: BTreeMap<String, f64>,
    pub artifacts: BTreeMap<String, ScanVolume>,
}

impl ScoreOutput {
    pub fn metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    pub fn artifact(mut self, name: &str, volume: ScanVolume) -> Self {
        self.artifacts.insert(name.to_string(), volume);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("no voxels left to score")]
    EmptyVolume,

    #[error("metric '{0}' is not a finite number")]
    NonFinite(String),

    #[error("scorer '{command}' failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("scorer output is not a JSON object of numbers: {0}")]
    InvalidOutput(String),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("cannot stage scan for scorer: {0}")]
    Staging(#[from] ScanError),

    #[error("cannot stage scan for scorer: {0}")]
    Io(#[from] std::io::Error),

    #[error("scoring task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait QualityScorer: Send + Sync {
    fn name(&self) -> &str;

    async fn score(&self, request: ScoreRequest<'_>) -> Result<ScoreOutput, ScoringError>;
}

/// Scorer selected by the run configuration
pub fn scorer_for(config: &RunConfig, runner: Arc<dyn ProcessRunner>) -> Arc<dyn QualityScorer> {
    match &config.scorer_command {
        Some(command) => {
            Arc::new(CommandScorer::new(command, runner).with_timeout(config.unit_timeout))
        }
        None => Arc::new(SummaryScorer),
    }
}

/// Reject metric maps containing NaN or infinities
pub fn check_finite(metrics: &BTreeMap<String, f64>) -> Result<(), ScoringError> {
    match metrics.iter().find(|(_, v)| !v.is_finite()) {
        Some((name, _)) => Err(ScoringError::NonFinite(name.clone())),
        None => Ok(()),
    }
}
