//! Bounded subprocess execution.
//!
//! Every external program conductor runs (self-tests, `git`, generator and
//! verifier commands) goes through [`run_with_timeout`], which feeds optional
//! stdin, captures output, and hard-kills the child when the deadline passes.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, warn};

use crate::error::{ConductorError, Result};

/// Captured result of a finished child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the child was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last non-empty stderr line, falling back to stdout; used in log lines.
    #[must_use]
    pub fn summary(&self) -> String {
        let pick = |s: &str| {
            s.lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
        };
        pick(&self.stderr)
            .or_else(|| pick(&self.stdout))
            .unwrap_or_else(|| format!("exit status {:?}", self.code))
    }
}

/// A program invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec<'a> {
    pub program: &'a str,
    pub args: &'a [String],
    pub cwd: Option<&'a Path>,
    pub stdin: Option<&'a str>,
    pub env: HashMap<String, String>,
}

impl<'a> CommandSpec<'a> {
    #[must_use]
    pub fn new(program: &'a str, args: &'a [String]) -> Self {
        Self {
            program,
            args,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn current_dir(mut self, dir: &'a Path) -> Self {
        self.cwd = Some(dir);
        self
    }

    #[must_use]
    pub fn stdin(mut self, input: &'a str) -> Self {
        self.stdin = Some(input);
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Run a command to completion or kill it after `timeout`.
///
/// # Errors
///
/// Returns [`ConductorError::Timeout`] when the deadline passes (the child is
/// killed), or [`ConductorError::Io`] when the program cannot be spawned.
pub async fn run_with_timeout(spec: CommandSpec<'_>, timeout: Duration) -> Result<CommandOutput> {
    debug!(program = spec.program, args = ?spec.args, "spawning");

    let mut command = AsyncCommand::new(spec.program);
    command
        .args(spec.args)
        .envs(&spec.env)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Dropping the wait future on timeout kills the child.
        .kill_on_drop(true);
    if let Some(dir) = spec.cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn()?;

    // The write runs beside the wait so a child that never drains stdin
    // still hits the deadline.
    let writer = match (spec.stdin, child.stdin.take()) {
        (Some(input), Some(mut stdin)) => {
            let input = input.as_bytes().to_vec();
            let program = spec.program.to_string();
            Some(tokio::spawn(async move {
                // A child that exits without reading stdin closes the pipe;
                // that is reported through its exit status, not here.
                if let Err(e) = stdin.write_all(&input).await {
                    debug!("stdin write to {program} failed: {e}");
                }
            }))
        }
        _ => None,
    };

    let result = tokio::time::timeout(timeout, child.wait_with_output()).await;
    if let Some(writer) = writer {
        writer.abort();
    }

    match result {
        Ok(Ok(output)) => Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            warn!(program = spec.program, "killed after {}s", timeout.as_secs());
            Err(ConductorError::Timeout {
                what: spec.program.to_string(),
                secs: timeout.as_secs(),
            })
        }
    }
}
