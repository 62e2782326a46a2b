//! Cluster submission
//!
//! Each unit becomes one scheduler job. The dispatcher serialises a
//! [`UnitRequest`] next to a job script that calls `qapflow run-unit`, submits
//! the script, polls the scheduler until the job is gone and then reads the
//! outcome file the worker left behind.
//!
//! ```text
//! <working>/cluster/<kind>-<slug>.request.json   unit + run configuration
//! <working>/cluster/<kind>-<slug>.sh             job script
//! <working>/cluster/<kind>-<slug>.outcome.json   written by the worker
//! <working>/cluster/<kind>-<slug>.log            scheduler stdout/stderr
//! ```

use super::retry::{RetryConfig, RetryExecutor};
use super::{dispatch_failure, DispatchError, Dispatcher};
use crate::aggregation::UnitOutcome;
use crate::config::{ClusterSystem, RunConfig};
use crate::error::{ErrorCode, QapError, Result};
use crate::pipeline::UnitRunner;
use crate::resources::ResourceLease;
use crate::session::AnalysisUnit;
use crate::subprocess::{ProcessCommandBuilder, ProcessOutput, ProcessRunner};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

/// Everything a worker needs to run one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRequest {
    pub unit: AnalysisUnit,
    pub config: RunConfig,
}

/// Scheduler view of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    /// No longer known to the scheduler, finished or failed
    Gone,
}

/// Resources and files of one job
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub slots: usize,
    pub memory_mb: u64,
    pub request: PathBuf,
    pub outcome: PathBuf,
    pub log: PathBuf,
    pub worker: PathBuf,
}

impl JobSpec {
    /// Job scripts are text, so every path they name must be UTF-8
    fn files(
        dir: &Path,
        unit: &AnalysisUnit,
        lease: &ResourceLease,
        worker: &Path,
    ) -> std::result::Result<Self, DispatchError> {
        for path in [dir, worker] {
            if path.to_str().is_none() {
                return Err(DispatchError::Submission(format!(
                    "{} is not valid UTF-8 and cannot appear in a job script",
                    path.display()
                )));
            }
        }
        let name = format!("{}-{}", unit.kind(), unit.id().slug());
        Ok(Self {
            slots: lease.slots(),
            memory_mb: lease.memory_mb(),
            request: dir.join(format!("{}.request.json", name)),
            outcome: dir.join(format!("{}.outcome.json", name)),
            log: dir.join(format!("{}.log", name)),
            worker: worker.to_path_buf(),
            name,
        })
    }

    fn script_path(&self) -> PathBuf {
        self.request.with_file_name(format!("{}.sh", self.name))
    }

    fn worker_command(&self) -> String {
        format!(
            "exec {} run-unit --request {} --outcome {}",
            shell_quote(&self.worker.to_string_lossy()),
            shell_quote(&self.request.to_string_lossy()),
            shell_quote(&self.outcome.to_string_lossy()),
        )
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[async_trait]
pub trait ClusterBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Job script for `job`, including scheduler directives
    fn render_script(&self, job: &JobSpec) -> String;

    /// Submit the script at `script`, returning the scheduler job id
    async fn submit(&self, script: &Path, job: &JobSpec) -> std::result::Result<String, DispatchError>;

    async fn poll(&self, job_id: &str) -> std::result::Result<JobState, DispatchError>;

    async fn cancel(&self, job_id: &str) -> std::result::Result<(), DispatchError>;
}

/// SLURM, SGE and PBS through their command line tools
pub struct SchedulerBackend {
    system: ClusterSystem,
    runner: Arc<dyn ProcessRunner>,
}

impl SchedulerBackend {
    pub fn new(system: ClusterSystem, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { system, runner }
    }

    fn directives(&self, job: &JobSpec) -> Vec<String> {
        let log = job.log.display();
        match self.system {
            ClusterSystem::Slurm => vec![
                format!("#SBATCH --cpus-per-task={}", job.slots),
                format!("#SBATCH --mem={}M", job.memory_mb.max(1)),
                format!("#SBATCH --output={}", log),
            ],
            ClusterSystem::Sge => vec![
                "#$ -S /bin/sh".to_string(),
                format!("#$ -pe smp {}", job.slots),
                format!("#$ -l h_vmem={}M", job.memory_mb.max(1)),
                format!("#$ -o {}", log),
                "#$ -j y".to_string(),
            ],
            ClusterSystem::Pbs => vec![
                format!("#PBS -l nodes=1:ppn={}", job.slots),
                format!("#PBS -l mem={}mb", job.memory_mb.max(1)),
                format!("#PBS -o {}", log),
                "#PBS -j oe".to_string(),
            ],
            ClusterSystem::None => Vec::new(),
        }
    }

    async fn run(
        &self,
        builder: ProcessCommandBuilder,
    ) -> std::result::Result<ProcessOutput, String> {
        let command = builder.build();
        let display = command.display();
        self.runner
            .run(command)
            .await
            .map_err(|e| format!("{}: {}", display, e))
    }

    fn parse_job_id(&self, stdout: &str) -> Option<String> {
        let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
        let id = match self.system {
            // --parsable prints "<id>[;<cluster>]"
            ClusterSystem::Slurm => line.split(';').next().unwrap_or(line),
            // -terse prints "<id>" or "<id>.<task range>" for arrays
            ClusterSystem::Sge => line.split('.').next().unwrap_or(line),
            ClusterSystem::Pbs | ClusterSystem::None => line,
        };
        (!id.is_empty()).then(|| id.to_string())
    }

    fn parse_state(&self, output: &ProcessOutput) -> Option<JobState> {
        let text = format!("{}\n{}", output.stdout, output.stderr).to_ascii_lowercase();
        if !output.status.success() {
            let gone = ["invalid job id", "do not exist", "unknown job id", "has finished"];
            return gone.iter().any(|p| text.contains(p)).then_some(JobState::Gone);
        }
        match self.system {
            ClusterSystem::Slurm => {
                let state = output.stdout.trim().to_ascii_uppercase();
                Some(match state.as_str() {
                    "" => JobState::Gone,
                    "PENDING" | "CONFIGURING" | "REQUEUED" | "SUSPENDED" => JobState::Queued,
                    "RUNNING" | "COMPLETING" => JobState::Running,
                    _ => JobState::Gone,
                })
            }
            // qstat -j only answers for jobs the scheduler still holds
            ClusterSystem::Sge => Some(JobState::Running),
            ClusterSystem::Pbs => {
                let row = output.stdout.lines().rev().find(|l| !l.trim().is_empty())?;
                let state = row.split_whitespace().nth(4)?;
                Some(match state {
                    "Q" | "H" | "W" | "T" => JobState::Queued,
                    "R" | "E" => JobState::Running,
                    _ => JobState::Gone,
                })
            }
            ClusterSystem::None => Some(JobState::Gone),
        }
    }
}

#[async_trait]
impl ClusterBackend for SchedulerBackend {
    fn name(&self) -> &str {
        match self.system {
            ClusterSystem::Slurm => "slurm",
            ClusterSystem::Sge => "sge",
            ClusterSystem::Pbs => "pbs",
            ClusterSystem::None => "none",
        }
    }

    fn render_script(&self, job: &JobSpec) -> String {
        let mut lines = vec!["#!/bin/sh".to_string()];
        lines.extend(self.directives(job));
        lines.push(job.worker_command());
        lines.push(String::new());
        lines.join("\n")
    }

    async fn submit(&self, script: &Path, job: &JobSpec) -> std::result::Result<String, DispatchError> {
        let builder = match self.system {
            ClusterSystem::Slurm => ProcessCommandBuilder::new("sbatch")
                .args(["--parsable", "--job-name", job.name.as_str()])
                .arg_path(script),
            ClusterSystem::Sge => ProcessCommandBuilder::new("qsub")
                .args(["-terse", "-N", job.name.as_str()])
                .arg_path(script),
            ClusterSystem::Pbs => ProcessCommandBuilder::new("qsub")
                .args(["-N", job.name.as_str()])
                .arg_path(script),
            ClusterSystem::None => {
                return Err(DispatchError::Submission(
                    "no cluster system configured".to_string(),
                ))
            }
        };

        let output = self.run(builder).await.map_err(DispatchError::Submission)?;
        if !output.status.success() {
            return Err(DispatchError::Submission(format!(
                "{} ({})",
                output.diagnostics(),
                output.status
            )));
        }
        self.parse_job_id(&output.stdout).ok_or_else(|| {
            DispatchError::Submission(format!("no job id in '{}'", output.stdout.trim()))
        })
    }

    async fn poll(&self, job_id: &str) -> std::result::Result<JobState, DispatchError> {
        let builder = match self.system {
            ClusterSystem::Slurm => {
                ProcessCommandBuilder::new("squeue").args(["-h", "-j", job_id, "-o", "%T"])
            }
            ClusterSystem::Sge => ProcessCommandBuilder::new("qstat").args(["-j", job_id]),
            ClusterSystem::Pbs => ProcessCommandBuilder::new("qstat").arg(job_id),
            ClusterSystem::None => return Ok(JobState::Gone),
        };
        let poll_error = |message: String| DispatchError::Poll {
            job_id: job_id.to_string(),
            message,
        };

        let output = self.run(builder).await.map_err(poll_error)?;
        self.parse_state(&output)
            .ok_or_else(|| poll_error(format!("{} ({})", output.diagnostics(), output.status)))
    }

    async fn cancel(&self, job_id: &str) -> std::result::Result<(), DispatchError> {
        let program = match self.system {
            ClusterSystem::Slurm => "scancel",
            ClusterSystem::Sge | ClusterSystem::Pbs => "qdel",
            ClusterSystem::None => return Ok(()),
        };
        let output = self
            .run(ProcessCommandBuilder::new(program).arg(job_id))
            .await
            .map_err(|message| DispatchError::Poll {
                job_id: job_id.to_string(),
                message,
            })?;
        if !output.status.success() {
            warn!("{} {} exited with {}", program, job_id, output.status);
        }
        Ok(())
    }
}

pub struct ClusterDispatcher {
    config: Arc<RunConfig>,
    backend: Arc<dyn ClusterBackend>,
    retry: RetryExecutor,
    worker: PathBuf,
    timeout: Option<Duration>,
}

impl ClusterDispatcher {
    pub fn new(config: Arc<RunConfig>, backend: Arc<dyn ClusterBackend>) -> Self {
        let worker = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("qapflow"));
        Self {
            retry: RetryExecutor::new(RetryConfig::from_policy(&config.cluster)),
            timeout: config.unit_timeout,
            config,
            backend,
            worker,
        }
    }

    /// Executable invoked by job scripts
    pub fn with_worker(mut self, worker: impl Into<PathBuf>) -> Self {
        self.worker = worker.into();
        self
    }

    pub fn job_dir(&self) -> PathBuf {
        self.config.working_directory.join("cluster")
    }

    async fn execute(
        &self,
        unit: &AnalysisUnit,
        lease: &ResourceLease,
    ) -> std::result::Result<UnitOutcome, DispatchError> {
        let job = JobSpec::files(&self.job_dir(), unit, lease, &self.worker)?;
        let script = job.script_path();
        self.stage(unit, &job, &script).await?;

        let job_id = self
            .retry
            .execute_with_retry(|| self.backend.submit(&script, &job), "job submission")
            .await?;
        info!("Submitted {} to {} as job {}", unit.key, self.backend.name(), job_id);

        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.wait_for(&job_id)).await {
                Ok(waited) => waited?,
                Err(_) => {
                    if let Err(e) = self.backend.cancel(&job_id).await {
                        warn!("Could not cancel job {}: {}", job_id, e);
                    }
                    return Err(DispatchError::Timeout(limit));
                }
            },
            None => self.wait_for(&job_id).await?,
        }

        let outcome = read_outcome(unit, &job.outcome).await?;
        if outcome.is_success() && !self.config.flags.write_all_outputs {
            remove_job_files(&job, &script).await;
        }
        Ok(outcome)
    }

    async fn stage(
        &self,
        unit: &AnalysisUnit,
        job: &JobSpec,
        script: &Path,
    ) -> std::result::Result<(), DispatchError> {
        let staging = |e: std::io::Error| DispatchError::Submission(format!("staging job: {}", e));
        let request = UnitRequest {
            unit: unit.clone(),
            config: self.config.as_ref().clone(),
        };
        let body = serde_json::to_vec_pretty(&request)
            .map_err(|e| DispatchError::Submission(format!("serialising request: {}", e)))?;

        tokio::fs::create_dir_all(self.job_dir()).await.map_err(staging)?;
        tokio::fs::write(&job.request, body).await.map_err(staging)?;
        tokio::fs::write(script, self.backend.render_script(job))
            .await
            .map_err(staging)?;
        match tokio::fs::remove_file(&job.outcome).await {
            Ok(()) => debug!("Removed stale {}", job.outcome.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(staging(e)),
        }
        Ok(())
    }

    async fn wait_for(&self, job_id: &str) -> std::result::Result<(), DispatchError> {
        let policy = &self.config.cluster;
        let mut interval = policy.poll_interval;
        loop {
            tokio::time::sleep(interval).await;
            let state = self
                .retry
                .execute_with_retry(|| self.backend.poll(job_id), "job poll")
                .await?;
            debug!("Job {} is {:?}", job_id, state);
            if state == JobState::Gone {
                return Ok(());
            }
            interval = (interval * 2).min(policy.max_poll_interval);
        }
    }
}

#[async_trait]
impl Dispatcher for ClusterDispatcher {
    fn name(&self) -> &str {
        self.backend.name()
    }

    async fn dispatch(&self, unit: AnalysisUnit, lease: ResourceLease) -> UnitOutcome {
        let span = info_span!("unit", id = %unit.id(), kind = %unit.kind());
        let outcome = match self.execute(&unit, &lease).instrument(span).await {
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

async fn read_outcome(
    unit: &AnalysisUnit,
    path: &Path,
) -> std::result::Result<UnitOutcome, DispatchError> {
    let missing = |message: String| DispatchError::MissingOutcome {
        path: path.to_path_buf(),
        message,
    };
    let bytes = tokio::fs::read(path).await.map_err(|e| missing(e.to_string()))?;
    let outcome: UnitOutcome =
        serde_json::from_slice(&bytes).map_err(|e| missing(format!("unreadable outcome: {}", e)))?;
    if outcome.key() != &unit.key {
        return Err(DispatchError::Crashed(format!(
            "outcome file belongs to {}",
            outcome.key()
        )));
    }
    Ok(outcome)
}

async fn remove_job_files(job: &JobSpec, script: &Path) {
    for path in [job.request.as_path(), script, job.outcome.as_path(), job.log.as_path()] {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("Could not remove {}: {}", path.display(), e);
            }
        }
    }
    if let Some(dir) = job.request.parent() {
        // Fails while sibling jobs still have files, which is fine
        let _ = tokio::fs::remove_dir(dir).await;
    }
}

/// Worker side of a cluster job: run one unit and write its outcome.
///
/// The outcome is written to a temporary file first and renamed into place so
/// the dispatcher never reads a partial file.
pub async fn run_unit_request(
    request_path: &Path,
    outcome_path: &Path,
    processes: Arc<dyn ProcessRunner>,
) -> Result<UnitOutcome> {
    let body = tokio::fs::read(request_path).await.map_err(|e| {
        QapError::config_with_code(
            ErrorCode::CONFIG_NOT_FOUND,
            format!("cannot read unit request {}", request_path.display()),
            None,
        )
        .with_source(e)
    })?;
    let request: UnitRequest = serde_json::from_slice(&body).map_err(|e| {
        QapError::config_with_code(
            ErrorCode::CONFIG_INVALID_VALUE,
            format!("invalid unit request {}", request_path.display()),
            None,
        )
        .with_source(e)
    })?;

    let runner = UnitRunner::from_config(Arc::new(request.config), processes);
    let outcome = runner.run(request.unit).await;

    let encoded = serde_json::to_vec_pretty(&outcome).map_err(|e| {
        QapError::sink_with_code(
            ErrorCode::SINK_SERIALIZATION_ERROR,
            "cannot encode unit outcome",
            Some(outcome_path.to_path_buf()),
        )
        .with_source(e)
    })?;
    let staging = outcome_path.with_extension("tmp");
    tokio::fs::write(&staging, encoded)
        .await
        .map_err(|e| QapError::sink_io(e, &staging))?;
    tokio::fs::rename(&staging, outcome_path)
        .await
        .map_err(|e| QapError::sink_io(e, outcome_path))?;
    Ok(outcome)
}
