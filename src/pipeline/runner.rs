//! Unit pipeline runner
//!
//! Drives one [`AnalysisUnit`] through the stage state machine, performing
//! the file I/O and scoring each stage needs. Every error is folded into a
//! failure outcome; `run` itself cannot fail.

use super::error::UnitError;
use super::state_machine::{apply_transition, state_to_outcome, StageTransition, UnitState};
use crate::aggregation::{FailureKind, UnitOutcome};
use crate::config::RunConfig;
use crate::scan::{read_volume, write_volume, ScanError, ScanVolume};
use crate::scoring::{check_finite, scorer_for, QualityScorer, ScoreOutput, ScoreRequest};
use crate::session::{AnalysisUnit, ScanKind};
use crate::subprocess::ProcessRunner;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

#[derive(Clone)]
pub struct UnitRunner {
    config: Arc<RunConfig>,
    scorer: Arc<dyn QualityScorer>,
}

impl UnitRunner {
    pub fn new(config: Arc<RunConfig>, scorer: Arc<dyn QualityScorer>) -> Self {
        Self { config, scorer }
    }

    /// Runner with the scorer named by the configuration
    pub fn from_config(config: Arc<RunConfig>, processes: Arc<dyn ProcessRunner>) -> Self {
        let scorer = scorer_for(&config, processes);
        Self::new(config, scorer)
    }

    pub fn config(&self) -> &Arc<RunConfig> {
        &self.config
    }

    /// Directory holding a unit's intermediate artifacts. Always a descendant
    /// of the run's intermediate root.
    pub fn artifact_dir(&self, unit: &AnalysisUnit) -> Result<PathBuf, UnitError> {
        let id = unit.id();
        let root = self.config.intermediate_root();
        if let Some((field, value)) = id.unsafe_component() {
            return Err(UnitError::persist(
                root,
                format!("{} identifier \"{}\" is not a single directory name", field, value),
            ));
        }
        Ok(root.join(&id.subject).join(&id.session).join(&id.scan))
    }

    /// Execute every stage of `unit`, producing exactly one outcome
    pub async fn run(&self, unit: AnalysisUnit) -> UnitOutcome {
        let span = info_span!("unit", id = %unit.id(), kind = %unit.kind());
        self.drive(unit).instrument(span).await
    }

    async fn drive(&self, unit: AnalysisUnit) -> UnitOutcome {
        let fallback = unit.clone();
        let mut state = UnitState::new(unit);

        while !state.is_terminal() {
            let transition = match self.advance(&state).await {
                Ok(transition) => transition,
                Err(error) => {
                    warn!("{} failed: {}", error.stage(), error);
                    StageTransition::Fail { error }
                }
            };
            state = match apply_transition(state, transition) {
                Ok(next) => next,
                Err(e) => {
                    return UnitOutcome::failure(&fallback, FailureKind::Crash, e.to_string());
                }
            };
            debug!("Unit is {}", state.name());
        }

        state_to_outcome(state).unwrap_or_else(|| {
            UnitOutcome::failure(&fallback, FailureKind::Crash, "pipeline stopped early")
        })
    }

    async fn advance(&self, state: &UnitState) -> Result<StageTransition, UnitError> {
        match state {
            UnitState::Pending { unit } => {
                let volume = load(unit.path.clone()).await?;
                Ok(StageTransition::Load { volume })
            }
            UnitState::Loaded { unit, volume } => {
                let volume = trim(unit, volume)?;
                Ok(StageTransition::Trim { volume })
            }
            UnitState::Trimmed { unit, volume } => {
                let output = self.score(unit, volume).await?;
                Ok(StageTransition::Score { output })
            }
            UnitState::Scored {
                unit,
                volume,
                output,
            } => {
                if self.config.flags.write_all_outputs {
                    self.persist(unit, volume, output).await?;
                }
                Ok(StageTransition::Persist)
            }
            UnitState::Persisted { .. } => Ok(StageTransition::Finish),
            // Terminal states never reach here
            UnitState::Done { .. } | UnitState::Failed { .. } => Ok(StageTransition::Finish),
        }
    }

    async fn score(&self, unit: &AnalysisUnit, volume: &ScanVolume) -> Result<ScoreOutput, UnitError> {
        let template = match unit.kind() {
            ScanKind::Anatomical => self.config.template_head_for_anat.as_deref(),
            ScanKind::Functional => None,
        };
        let output = self
            .scorer
            .score(ScoreRequest {
                unit,
                volume,
                exclude_zeros: unit.exclude_zeros,
                template,
            })
            .await?;
        check_finite(&output.metrics)?;
        debug!("{} produced {} metrics", self.scorer.name(), output.metrics.len());
        Ok(output)
    }

    async fn persist(
        &self,
        unit: &AnalysisUnit,
        volume: &ScanVolume,
        output: &ScoreOutput,
    ) -> Result<(), UnitError> {
        let dir = self.artifact_dir(unit)?;
        let mut files: Vec<(PathBuf, ScanVolume)> = vec![(dir.join("trimmed.nii.gz"), volume.clone())];
        for (name, artifact) in &output.artifacts {
            files.push((dir.join(format!("{}.nii.gz", name)), artifact.clone()));
        }
        let metrics = serde_json::to_vec_pretty(&output.metrics)
            .map_err(|e| UnitError::persist(dir.join("metrics.json"), e))?;

        let target = dir.clone();
        tokio::task::spawn_blocking(move || write_artifacts(&target, files, &metrics))
            .await
            .map_err(|e| UnitError::persist(&dir, e))??;
        debug!("Persisted intermediates to {}", dir.display());
        Ok(())
    }
}

async fn load(path: PathBuf) -> Result<ScanVolume, UnitError> {
    let source = path.clone();
    tokio::task::spawn_blocking(move || read_volume(&source))
        .await
        .map_err(|e| UnitError::Input {
            path: path.clone(),
            source: ScanError::Header(format!("reader task failed: {}", e)),
        })?
        .map_err(|source| UnitError::Input { path, source })
}

fn trim(unit: &AnalysisUnit, volume: &ScanVolume) -> Result<ScanVolume, UnitError> {
    unit.window.validate().map_err(|source| UnitError::Range {
        window: unit.window,
        source,
    })?;
    match unit.kind() {
        ScanKind::Anatomical => Ok(volume.clone()),
        ScanKind::Functional => {
            let range = unit
                .window
                .bounds(volume.len_frames())
                .map_err(|source| UnitError::Range {
                    window: unit.window,
                    source,
                })?;
            debug!("Keeping frames {:?} of {}", range, volume.len_frames());
            Ok(volume.trim(range))
        }
    }
}

fn write_artifacts(
    dir: &Path,
    files: Vec<(PathBuf, ScanVolume)>,
    metrics: &[u8],
) -> Result<(), UnitError> {
    std::fs::create_dir_all(dir).map_err(|e| UnitError::persist(dir, e))?;
    for (path, volume) in files {
        write_volume(&path, &volume).map_err(|e| UnitError::persist(&path, e))?;
    }
    let metrics_path = dir.join("metrics.json");
    std::fs::write(&metrics_path, metrics).map_err(|e| UnitError::persist(&metrics_path, e))
}
