//! Subprocess execution for `osc` and `git`.

use crate::error::ObsError;
use crate::Result;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, trace};

/// Result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// The command line, for error messages and logs.
    pub command: String,

    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    fn into_result(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(ObsError::CommandFailed {
                command: self.command,
                code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// A single command line to execute.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the command in `dir` instead of the current directory.
    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Kill the command if it runs longer than `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Human readable command line. Arguments containing whitespace are
    /// single-quoted.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(char::is_whitespace) {
                line.push('\'');
                line.push_str(arg);
                line.push('\'');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Executes [`Invocation`]s with a common base environment.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    env: Vec<(String, String)>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an environment variable that is set for every command.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run the command and fail with [`ObsError::CommandFailed`] on a
    /// non-zero exit code.
    pub async fn run(&self, invocation: Invocation) -> Result<CommandOutput> {
        self.output(invocation).await?.into_result()
    }

    /// Run the command and return its output regardless of the exit code.
    pub async fn output(&self, invocation: Invocation) -> Result<CommandOutput> {
        let start = Instant::now();
        let command_line = invocation.display();
        debug!(command = %command_line, "running command");

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.cwd {
            command.current_dir(dir);
        }
        for (key, value) in self.env.iter().chain(invocation.env.iter()) {
            command.env(key, value);
        }

        let child = command.spawn().map_err(|source| ObsError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        let output = match invocation.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ObsError::Timeout {
                    command: command_line.clone(),
                    seconds: limit.as_secs(),
                })??,
            None => child.wait_with_output().await?,
        };

        let result = CommandOutput {
            command: command_line,
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        trace!(
            command = %result.command,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            "command finished"
        );
        Ok(result)
    }
}
