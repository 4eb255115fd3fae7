//! External process jobs.
//!
//! Each invocation is an ordinary future, so it can be handed to the
//! scheduler directly. Children are killed when their future is dropped,
//! which is how a cancelled worker stops its process.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Environment variables kept when [`CommandSpec::clean_env`] is set.
const INHERITED_ENV: [&str; 2] = ["PATH", "PWD"];

/// Process invocation failure.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The process could not be spawned or awaited.
    #[error("failed to run `{command}`: {source}")]
    Io {
        /// Rendered command line.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The process exited unsuccessfully.
    #[error("`{command}` failed with {returncode}")]
    Failed {
        /// Rendered command line.
        command: String,
        /// Exit code; 1 when the process was killed by a signal.
        returncode: i32,
        /// Captured standard output, trimmed.
        stdout: String,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// The process outlived its timeout and was killed.
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout {
        /// Rendered command line.
        command: String,
        /// Configured timeout.
        timeout: Duration,
    },

    /// The log file could not be prepared.
    #[error("failed to open log file {}: {source}", .path.display())]
    Log {
        /// Log file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl ProcessError {
    /// Exit code a CLI should terminate with for this error.
    #[must_use]
    pub fn returncode(&self) -> i32 {
        match self {
            Self::Failed { returncode, .. } => *returncode,
            _ => 1,
        }
    }

    /// Log the command and its captured output, then return the exit code.
    pub fn report(&self) -> i32 {
        match self {
            Self::Failed {
                command,
                stdout,
                stderr,
                ..
            } => {
                tracing::error!("{command}");
                for line in stdout.lines() {
                    tracing::info!("{line}");
                }
                for line in stderr.lines() {
                    tracing::error!("{line}");
                }
            }
            other => tracing::error!("{other}"),
        }
        self.returncode()
    }
}

/// One external process invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program to run.
    pub program: String,
    /// Program arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Start from an empty environment, keeping only `PATH` and `PWD`.
    pub clean_env: bool,
    /// Capture standard output (otherwise it is discarded).
    pub capture_stdout: bool,
    /// Append stdout and stderr to this file instead of capturing them.
    pub log_file: Option<PathBuf>,
    /// Kill the process after this long.
    pub timeout: Option<Duration>,
    /// Log the command line before running it.
    pub log: bool,
}

impl CommandSpec {
    /// Run `program` with no arguments, capturing stdout.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            clean_env: false,
            capture_stdout: true,
            log_file: None,
            timeout: None,
            log: true,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Only pass `PATH`, `PWD` and explicit variables to the child.
    #[must_use]
    pub fn clean_env(mut self) -> Self {
        self.clean_env = true;
        self
    }

    /// Discard standard output.
    #[must_use]
    pub fn discard_stdout(mut self) -> Self {
        self.capture_stdout = false;
        self
    }

    /// Append all output to `path`.
    #[must_use]
    pub fn log_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Kill the process after `timeout`.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Do not log the command line.
    #[must_use]
    pub fn quiet(mut self) -> Self {
        self.log = false;
        self
    }

    /// Command line as logged and reported in errors.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Owned job running this command.
    pub fn into_job(self) -> impl Future<Output = Result<Vec<u8>, ProcessError>> + Send + 'static {
        async move { run_command(&self).await }
    }
}

/// Run one command to completion and return its captured stdout.
///
/// # Errors
///
/// Returns [`ProcessError::Failed`] on a non-zero exit,
/// [`ProcessError::Timeout`] when the timeout elapses, and
/// [`ProcessError::Io`] / [`ProcessError::Log`] for spawn or log-file problems.
pub async fn run_command(spec: &CommandSpec) -> Result<Vec<u8>, ProcessError> {
    let command_line = spec.command_line();
    if spec.log {
        tracing::info!("+ {command_line}");
    }

    let mut command = Command::new(&spec.program);
    command.args(&spec.args).stdin(Stdio::null()).kill_on_drop(true);
    if spec.clean_env {
        command.env_clear();
        for key in INHERITED_ENV {
            if let Some(value) = std::env::var_os(key) {
                command.env(key, value);
            }
        }
    }
    command.envs(spec.env.iter().map(|(key, value)| (key, value)));

    let mut stderr_note = Vec::new();
    match &spec.log_file {
        Some(path) => {
            let log = open_log(path).await?;
            let log_err = log.try_clone().map_err(|source| ProcessError::Log {
                path: path.clone(),
                source,
            })?;
            command.stdout(log).stderr(log_err);
            stderr_note = format!("logs in {}\n", path.display()).into_bytes();
        }
        None => {
            command
                .stdout(if spec.capture_stdout {
                    Stdio::piped()
                } else {
                    Stdio::null()
                })
                .stderr(Stdio::piped());
        }
    }

    let io_error = |source| ProcessError::Io {
        command: command_line.clone(),
        source,
    };
    let child = command.spawn().map_err(io_error)?;
    let output = match spec.timeout {
        Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ProcessError::Timeout {
                command: command_line.clone(),
                timeout,
            })?,
        None => child.wait_with_output().await,
    }
    .map_err(io_error)?;

    if !output.status.success() {
        stderr_note.extend_from_slice(&output.stderr);
        return Err(ProcessError::Failed {
            command: command_line,
            returncode: output.status.code().filter(|code| *code != 0).unwrap_or(1),
            stdout: decode(&output.stdout),
            stderr: decode(&stderr_note),
        });
    }
    Ok(output.stdout)
}

/// Run a command with output discarded, returning its failure as a value.
pub async fn check_command(spec: &CommandSpec) -> Option<ProcessError> {
    let quiet = CommandSpec {
        capture_stdout: false,
        log: false,
        ..spec.clone()
    };
    run_command(&quiet).await.err()
}

async fn open_log(path: &Path) -> Result<std::fs::File, ProcessError> {
    let log_error = |source| ProcessError::Log {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(log_error)?;
    }
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(log_error)?;
    Ok(file.into_std().await)
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}
