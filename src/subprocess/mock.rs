use async_trait::async_trait;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::error::ProcessError;
use super::runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner};

/// Scripted [`ProcessRunner`] for scheduler and scorer tests.
///
/// Scripts are tried in the order they were added. A script limited with
/// [`MockCommandConfig::times`] stops matching once used up, so a failing
/// reply followed by a succeeding one scripts a retry.
#[derive(Clone, Default)]
pub struct MockProcessRunner {
    scripts: Arc<Mutex<Vec<Script>>>,
    calls: Arc<Mutex<Vec<ProcessCommand>>>,
}

type ArgsMatcher = Box<dyn Fn(&[OsString]) -> bool + Send + Sync>;

struct Script {
    program: String,
    matcher: Option<ArgsMatcher>,
    reply: Option<ProcessOutput>,
    remaining: Option<usize>,
}

impl Script {
    fn matches(&self, command: &ProcessCommand) -> bool {
        self.program == command.program
            && self.remaining != Some(0)
            && self.matcher.as_ref().map_or(true, |m| m(&command.args))
    }
}

/// A script under construction; nothing is registered until [`finish`](Self::finish)
pub struct MockCommandConfig {
    runner: MockProcessRunner,
    script: Script,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a reply for `program`; by default it succeeds silently
    pub fn expect_command(&self, program: &str) -> MockCommandConfig {
        MockCommandConfig {
            runner: self.clone(),
            script: Script {
                program: program.to_string(),
                matcher: None,
                reply: Some(ProcessOutput {
                    status: ExitStatus::Success,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: Duration::ZERO,
                }),
                remaining: None,
            },
        }
    }

    pub fn verify_called(&self, program: &str, times: usize) -> bool {
        self.call_count(program) == times
    }

    pub fn call_count(&self, program: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.program == program).count()
    }

    pub fn get_call_history(&self) -> Vec<ProcessCommand> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        lock(&self.calls).push(command.clone());

        let mut scripts = lock(&self.scripts);
        let Some(script) = scripts.iter_mut().find(|s| s.matches(&command)) else {
            return Err(ProcessError::MockExpectationNotMet(format!(
                "nothing scripted for {}",
                command.display()
            )));
        };
        if let Some(remaining) = script.remaining.as_mut() {
            *remaining -= 1;
        }
        script
            .reply
            .clone()
            .ok_or(ProcessError::CommandNotFound(command.program))
    }
}

impl MockCommandConfig {
    pub fn with_args<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[OsString]) -> bool + Send + Sync + 'static,
    {
        self.script.matcher = Some(Box::new(matcher));
        self
    }

    fn edit(mut self, change: impl FnOnce(&mut ProcessOutput)) -> Self {
        if let Some(reply) = self.script.reply.as_mut() {
            change(reply);
        }
        self
    }

    pub fn returns_stdout(self, stdout: &str) -> Self {
        self.edit(|reply| reply.stdout = stdout.to_string())
    }

    pub fn returns_stderr(self, stderr: &str) -> Self {
        self.edit(|reply| reply.stderr = stderr.to_string())
    }

    pub fn returns_exit_code(self, code: i32) -> Self {
        self.edit(|reply| {
            reply.status = match code {
                0 => ExitStatus::Success,
                code => ExitStatus::Error(code),
            }
        })
    }

    /// Fail as if the program were not installed
    pub fn returns_not_found(mut self) -> Self {
        self.script.reply = None;
        self
    }

    pub fn times(mut self, n: usize) -> Self {
        self.script.remaining = Some(n);
        self
    }

    pub fn finish(self) {
        lock(&self.runner.scripts).push(self.script);
    }
}
