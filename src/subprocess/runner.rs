use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::error::ProcessError;

/// A program invocation. Scheduler and scorer commands never need a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<OsString>,
    pub timeout: Option<Duration>,
}

impl ProcessCommand {
    /// Command line for logs, quoting arguments that contain whitespace
    pub fn display(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|arg| arg.to_string_lossy().into_owned()))
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("'{}'", part)
                } else {
                    part
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    /// Stderr if the program wrote any, stdout otherwise
    pub fn diagnostics(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Timeout,
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        *self == ExitStatus::Success
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            ExitStatus::Timeout | ExitStatus::Signal(_) => None,
        }
    }

    fn from_std(status: std::process::ExitStatus) -> Self {
        if status.success() {
            return ExitStatus::Success;
        }
        if let Some(code) = status.code() {
            return ExitStatus::Error(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitStatus::Signal(signal);
            }
        }
        ExitStatus::Error(1)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Success => f.write_str("exit code 0"),
            ExitStatus::Error(code) => write!(f, "exit code {}", code),
            ExitStatus::Timeout => f.write_str("timeout"),
            ExitStatus::Signal(signal) => write!(f, "signal {}", signal),
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;
}

/// Runs commands as child processes of qapflow
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let command_line = command.display();
        debug!("Running {}", command_line);
        let start = Instant::now();

        let child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ProcessError::CommandNotFound(command.program.clone()),
                _ => ProcessError::SpawnFailed {
                    command: command_line.clone(),
                    source: e,
                },
            })?;

        let waited = match command.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output()).await,
            None => Ok(child.wait_with_output().await),
        };

        let result = match waited {
            Ok(output) => {
                let output = output?;
                ProcessOutput {
                    status: ExitStatus::from_std(output.status),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    duration: start.elapsed(),
                }
            }
            // The child is killed when its handle drops with the timed-out future
            Err(_) => ProcessOutput {
                status: ExitStatus::Timeout,
                stdout: String::new(),
                stderr: String::new(),
                duration: start.elapsed(),
            },
        };

        match result.status {
            ExitStatus::Success => debug!("{} finished in {:?}", command_line, result.duration),
            ExitStatus::Error(_) => {
                debug!("{} failed with {}", command_line, result.status);
                trace!("stderr: {}", result.stderr);
            }
            ExitStatus::Timeout | ExitStatus::Signal(_) => {
                warn!("{} stopped by {} after {:?}", command_line, result.status, result.duration)
            }
        }
        Ok(result)
    }
}
