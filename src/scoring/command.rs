//! External scoring program
//!
//! The program is invoked as
//! `<command> <kind> <scan> [--exclude-zeros] [--template <path>]` and must
//! print a JSON object mapping metric names to numbers on stdout. The scan is
//! a temporary copy of the trimmed volume that is removed once scoring ends.

use super::{QualityScorer, ScoreOutput, ScoreRequest, ScoringError};
use crate::scan::write_volume;
use crate::subprocess::{ProcessCommandBuilder, ProcessRunner};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct CommandScorer {
    program: String,
    base_args: Vec<String>,
    runner: Arc<dyn ProcessRunner>,
    timeout: Option<Duration>,
}

impl CommandScorer {
    /// `command` is split on whitespace into program and leading arguments
    pub fn new(command: &str, runner: Arc<dyn ProcessRunner>) -> Self {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        Self {
            program,
            base_args: parts.collect(),
            runner,
            timeout: None,
        }
    }

    /// Kill the program once `timeout` elapses
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn parse_metrics(stdout: &str) -> Result<BTreeMap<String, f64>, ScoringError> {
        let value: serde_json::Value = serde_json::from_str(stdout.trim())
            .map_err(|e| ScoringError::InvalidOutput(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| ScoringError::InvalidOutput("expected a JSON object".to_string()))?;
        object
            .iter()
            .map(|(name, value)| {
                value
                    .as_f64()
                    .map(|v| (name.clone(), v))
                    .ok_or_else(|| {
                        ScoringError::InvalidOutput(format!("'{}' is not a number", name))
                    })
            })
            .collect()
    }
}

#[async_trait]
impl QualityScorer for CommandScorer {
    fn name(&self) -> &str {
        &self.program
    }

    async fn score(&self, request: ScoreRequest<'_>) -> Result<ScoreOutput, ScoringError> {
        let staged = tempfile::Builder::new()
            .prefix("qapflow-")
            .suffix(".nii.gz")
            .tempfile()?;
        let target = staged.path().to_path_buf();
        let volume = request.volume.clone();
        tokio::task::spawn_blocking(move || write_volume(&target, &volume)).await??;

        let mut builder = ProcessCommandBuilder::new(&self.program)
            .args(&self.base_args)
            .arg(request.unit.kind().as_str())
            .arg_path(staged.path())
            .flag("--exclude-zeros", request.exclude_zeros)
            .timeout(self.timeout);
        if let Some(template) = request.template {
            builder = builder.arg("--template").arg_path(template);
        }
        let command = builder.build();
        let display = command.display();

        let output = self.runner.run(command).await?;
        if !output.status.success() {
            return Err(ScoringError::CommandFailed {
                command: display,
                status: output.status.to_string(),
                stderr: output.diagnostics().to_string(),
            });
        }

        let metrics = Self::parse_metrics(&output.stdout)?;
        debug!("{} reported {} metrics", self.program, metrics.len());
        Ok(ScoreOutput {
            metrics,
            artifacts: BTreeMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::scan::ScanVolume;
    use crate::scoring::scorer_for;
    use crate::session::{AnalysisUnit, ScanKind, UnitId, UnitKey, Window};
    use crate::subprocess::MockProcessRunner;
    use std::path::{Path, PathBuf};

    fn unit() -> AnalysisUnit {
        AnalysisUnit {
            key: UnitKey {
                kind: ScanKind::Anatomical,
                id: UnitId::new("sub1", "ses1", "anat_1"),
            },
            site: None,
            path: PathBuf::from("/unused"),
            window: Window::default(),
            exclude_zeros: true,
        }
    }

    #[tokio::test]
    async fn test_invokes_program_and_parses_json() {
        let mock = MockProcessRunner::new();
        mock.expect_command("qap-score")
            .with_args(|args| {
                args[0] == "--fast"
                    && args[1] == "anatomical"
                    && args[2].to_string_lossy().ends_with(".nii.gz")
                    && args[3] == "--exclude-zeros"
                    && args[4..] == ["--template", "/tpl/head.nii.gz"]
            })
            .returns_stdout(r#"{"cnr": 2.5, "efc": 0.41}"#)
            .finish();

        let scorer = CommandScorer::new("qap-score --fast", Arc::new(mock.clone()));
        let volume = ScanVolume::from_f32([1, 1, 1, 1], vec![1.0]).unwrap();
        let unit = unit();
        let out = scorer
            .score(ScoreRequest {
                unit: &unit,
                volume: &volume,
                exclude_zeros: true,
                template: Some(Path::new("/tpl/head.nii.gz")),
            })
            .await
            .unwrap();

        assert_eq!(out.metrics["cnr"], 2.5);
        assert_eq!(out.metrics["efc"], 0.41);
        let staged = PathBuf::from(&mock.get_call_history()[0].args[2]);
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_scoring_error() {
        let mock = MockProcessRunner::new();
        mock.expect_command("qap-score")
            .returns_exit_code(2)
            .returns_stderr("segfault in fsl")
            .finish();
        let scorer = CommandScorer::new("qap-score", Arc::new(mock));
        let volume = ScanVolume::from_f32([1, 1, 1, 1], vec![1.0]).unwrap();
        let unit = unit();
        let err = scorer
            .score(ScoreRequest {
                unit: &unit,
                volume: &volume,
                exclude_zeros: false,
                template: None,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("segfault in fsl"));
    }

    #[tokio::test]
    async fn test_unit_timeout_bounds_scorer_process() {
        let mock = MockProcessRunner::new();
        mock.expect_command("qap-score")
            .returns_stdout(r#"{"cnr": 1.0}"#)
            .finish();
        let config = RunConfig::from_yaml_str(
            "num_processors: 1\nnum_sessions_at_once: 1\navailable_memory: 1\n\
             cluster_system: None\noutput_directory: /tmp/out\nworking_directory: /tmp/work\n\
             scorer_command: qap-score\nunit_timeout: 90s\n",
        )
        .unwrap();
        let scorer = scorer_for(&config, Arc::new(mock.clone()));
        let volume = ScanVolume::from_f32([1, 1, 1, 1], vec![1.0]).unwrap();
        let unit = unit();
        scorer
            .score(ScoreRequest {
                unit: &unit,
                volume: &volume,
                exclude_zeros: false,
                template: None,
            })
            .await
            .unwrap();
        assert_eq!(
            mock.get_call_history()[0].timeout,
            Some(Duration::from_secs(90))
        );
    }

    #[test]
    fn test_parse_metrics_rejects_non_numbers() {
        assert!(CommandScorer::parse_metrics(r#"{"a": 1}"#).is_ok());
        assert!(CommandScorer::parse_metrics(r#"{"a": "x"}"#).is_err());
        assert!(CommandScorer::parse_metrics("[1, 2]").is_err());
        assert!(CommandScorer::parse_metrics("not json").is_err());
    }
}
