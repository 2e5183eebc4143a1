//! `git` subprocess backend.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::{BranchBackend, VcsOp};
use crate::error::{ConductorError, Result};
use crate::process::{run_with_timeout, CommandSpec};

/// Runs `git` in a repository directory.
#[derive(Debug, Clone)]
pub struct GitBackend {
    repo: PathBuf,
    timeout: Duration,
}

impl GitBackend {
    #[must_use]
    pub fn new(repo: impl AsRef<Path>, timeout_secs: u64) -> Self {
        Self {
            repo: repo.as_ref().to_path_buf(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn git(&self, op: &VcsOp, args: &[&str]) -> Result<()> {
        let args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
        let output = run_with_timeout(
            CommandSpec::new("git", &args).current_dir(&self.repo),
            self.timeout,
        )
        .await
        .map_err(|e| match e {
            ConductorError::Timeout { .. } => e,
            other => ConductorError::isolation(op.name(), other.to_string()),
        })?;

        if output.success() {
            Ok(())
        } else {
            Err(ConductorError::isolation(op.name(), output.summary()))
        }
    }
}

#[async_trait]
impl BranchBackend for GitBackend {
    fn name(&self) -> &'static str {
        "git"
    }

    async fn apply(&self, op: &VcsOp) -> Result<()> {
        match op {
            VcsOp::CreateBranch(name) => self.git(op, &["checkout", "-b", name.as_str()]).await,
            VcsOp::SwitchBranch(name) => self.git(op, &["checkout", name.as_str()]).await,
            VcsOp::Commit(message) => {
                self.git(op, &["add", "."]).await?;
                self.git(op, &["commit", "-m", message.as_str()]).await
            }
        }
    }
}
