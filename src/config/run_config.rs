//! Run configuration
//!
//! [`RawConfig`] mirrors the configuration document key for key, with every
//! field optional. [`RawConfig::normalize`] is the only place defaults are
//! applied and values validated; it produces the immutable [`RunConfig`]
//! shared by every component for the rest of the run.

use crate::error::{ErrorCode, QapError, Result};
use crate::session::{StopIndex, Window};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Where units are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClusterSystem {
    /// Local worker pool
    None,
    Sge,
    Pbs,
    Slurm,
}

impl ClusterSystem {
    pub fn is_local(&self) -> bool {
        matches!(self, ClusterSystem::None)
    }
}

impl FromStr for ClusterSystem {
    type Err = QapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "NONE" => Ok(ClusterSystem::None),
            "SGE" => Ok(ClusterSystem::Sge),
            "PBS" => Ok(ClusterSystem::Pbs),
            "SLURM" => Ok(ClusterSystem::Slurm),
            _ => Err(QapError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("unknown cluster system '{}' (expected None, SGE, PBS or SLURM)", s),
                Some("cluster_system".to_string()),
            )),
        }
    }
}

impl fmt::Display for ClusterSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClusterSystem::None => "None",
            ClusterSystem::Sge => "SGE",
            ClusterSystem::Pbs => "PBS",
            ClusterSystem::Slurm => "SLURM",
        };
        f.write_str(name)
    }
}

/// Output behaviour toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputFlags {
    pub write_report: bool,
    pub write_graph: bool,
    pub write_all_outputs: bool,
    /// Per-unit default for background masking
    pub exclude_zeros: bool,
}

/// Retry and polling behaviour of cluster dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterPolicy {
    pub retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub max_poll_interval: Duration,
}

impl Default for ClusterPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(5),
            max_poll_interval: Duration::from_secs(60),
        }
    }
}

/// Fully-populated, immutable run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub num_processors: usize,
    pub num_sessions_at_once: usize,
    pub available_memory_gb: f64,
    pub cluster_system: ClusterSystem,
    pub output_directory: PathBuf,
    pub working_directory: PathBuf,
    pub template_head_for_anat: Option<PathBuf>,
    pub run_name: String,
    pub default_window: Window,
    pub flags: OutputFlags,
    pub scorer_command: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub unit_timeout: Option<Duration>,
    pub cluster: ClusterPolicy,
}

impl RunConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(content)?;
        raw.normalize()
    }

    /// Memory ceiling in whole megabytes
    pub fn memory_ceiling_mb(&self) -> u64 {
        (self.available_memory_gb * 1024.0).floor() as u64
    }

    /// Directory for this run's intermediate artifacts
    pub fn intermediate_root(&self) -> PathBuf {
        self.working_directory.join(&self.run_name)
    }
}

/// Configuration document as written, before defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    pub num_processors: Option<usize>,
    pub num_sessions_at_once: Option<usize>,
    pub available_memory: Option<f64>,
    pub cluster_system: Option<String>,
    pub output_directory: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,
    pub template_head_for_anat: Option<PathBuf>,
    pub exclude_zeros: Option<bool>,
    pub start_idx: Option<usize>,
    pub stop_idx: Option<StopIndex>,
    pub write_report: Option<bool>,
    pub write_graph: Option<bool>,
    pub write_all_outputs: Option<bool>,
    pub run_name: Option<String>,
    pub scorer_command: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub unit_timeout: Option<Duration>,
    pub cluster_retries: Option<u32>,
    #[serde(default, with = "humantime_serde")]
    pub cluster_retry_delay: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub cluster_poll_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub cluster_max_poll_interval: Option<Duration>,
    /// Keys consumed by other tools sharing the same document
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

fn missing(key: &str) -> QapError {
    QapError::config_with_code(
        ErrorCode::CONFIG_MISSING_REQUIRED,
        format!("{} is required", key),
        Some(key.to_string()),
    )
}

fn invalid(key: &str, message: impl Into<String>) -> QapError {
    QapError::config_with_code(ErrorCode::CONFIG_INVALID_VALUE, message, Some(key.to_string()))
}

fn required<T>(value: Option<T>, key: &str) -> Result<T> {
    value.ok_or_else(|| missing(key))
}

fn required_dir(value: Option<PathBuf>, key: &str) -> Result<PathBuf> {
    let dir = required(value, key)?;
    if dir.as_os_str().is_empty() {
        return Err(invalid(key, format!("{} must not be empty", key)));
    }
    Ok(dir)
}

impl RawConfig {
    /// Apply defaults and validate, producing the immutable run configuration
    pub fn normalize(self) -> Result<RunConfig> {
        let num_processors = required(self.num_processors, "num_processors")?;
        if num_processors == 0 {
            return Err(invalid("num_processors", "num_processors must be at least 1"));
        }
        let num_sessions_at_once = required(self.num_sessions_at_once, "num_sessions_at_once")?;
        if num_sessions_at_once == 0 {
            return Err(invalid(
                "num_sessions_at_once",
                "num_sessions_at_once must be at least 1",
            ));
        }
        let available_memory_gb = required(self.available_memory, "available_memory")?;
        if !available_memory_gb.is_finite() || available_memory_gb <= 0.0 {
            return Err(invalid(
                "available_memory",
                format!("available_memory must be a positive number of GB, got {}", available_memory_gb),
            ));
        }
        let cluster_system: ClusterSystem =
            required(self.cluster_system, "cluster_system")?.parse()?;
        let output_directory = required_dir(self.output_directory, "output_directory")?;
        let working_directory = required_dir(self.working_directory, "working_directory")?;

        let default_window = Window::new(
            self.start_idx.unwrap_or(0),
            self.stop_idx.unwrap_or(StopIndex::End),
        );
        default_window
            .validate()
            .map_err(|e| invalid("stop_idx", e.to_string()))?;

        let run_name = self
            .run_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "qap_run".to_string());

        let scorer_command = self
            .scorer_command
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        let defaults = ClusterPolicy::default();
        let cluster = ClusterPolicy {
            retries: self.cluster_retries.unwrap_or(defaults.retries),
            retry_delay: self.cluster_retry_delay.unwrap_or(defaults.retry_delay),
            poll_interval: self.cluster_poll_interval.unwrap_or(defaults.poll_interval),
            max_poll_interval: self
                .cluster_max_poll_interval
                .unwrap_or(defaults.max_poll_interval),
        };
        if cluster.poll_interval.is_zero() {
            return Err(invalid(
                "cluster_poll_interval",
                "cluster_poll_interval must be greater than zero",
            ));
        }
        if cluster.max_poll_interval < cluster.poll_interval {
            return Err(invalid(
                "cluster_max_poll_interval",
                "cluster_max_poll_interval must not be shorter than cluster_poll_interval",
            ));
        }

        for key in self.extra.keys() {
            debug!("Ignoring configuration key '{}'", key);
        }

        let config = RunConfig {
            num_processors,
            num_sessions_at_once,
            available_memory_gb,
            cluster_system,
            output_directory,
            working_directory,
            template_head_for_anat: self.template_head_for_anat,
            run_name,
            default_window,
            flags: OutputFlags {
                write_report: self.write_report.unwrap_or(false),
                write_graph: self.write_graph.unwrap_or(false),
                write_all_outputs: self.write_all_outputs.unwrap_or(false),
                exclude_zeros: self.exclude_zeros.unwrap_or(false),
            },
            scorer_command,
            unit_timeout: self.unit_timeout,
            cluster,
        };

        if config.memory_ceiling_mb() < config.num_sessions_at_once as u64 {
            return Err(invalid(
                "available_memory",
                "available_memory is too small to give every concurrent session a share",
            ));
        }

        if config.cluster_system.is_local() {
            warn_if_exceeds_host(&config);
        }
        Ok(config)
    }
}

/// Local runs asking for more than the host has are allowed but suspicious
fn warn_if_exceeds_host(config: &RunConfig) {
    if let Ok(cpus) = std::thread::available_parallelism() {
        if config.num_processors > cpus.get() {
            warn!(
                "num_processors ({}) exceeds the {} CPUs available on this host",
                config.num_processors,
                cpus.get()
            );
        }
    }

    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let total_gb = system.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
    if total_gb > 0.0 && config.available_memory_gb > total_gb {
        warn!(
            "available_memory ({:.1} GB) exceeds the {:.1} GB installed on this host",
            config.available_memory_gb, total_gb
        );
    }
}
