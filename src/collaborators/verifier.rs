//! Project-level verification command.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Verdict, Verifier};
use crate::error::ConductorError;
use crate::process::{run_with_timeout, CommandSpec};

/// Verification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Program and arguments; empty means verification always passes.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 300,
        }
    }
}

/// Runs the configured command in the project directory; exit 0 passes.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    config: VerifyConfig,
    cwd: PathBuf,
}

impl CommandVerifier {
    #[must_use]
    pub fn new(config: VerifyConfig, cwd: impl AsRef<Path>) -> Self {
        Self {
            config,
            cwd: cwd.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Verifier for CommandVerifier {
    async fn verify(&self) -> Result<Verdict> {
        let Some((program, args)) = self.config.command.split_first() else {
            return Ok(Verdict::pass("no verification command configured"));
        };

        match run_with_timeout(
            CommandSpec::new(program, args).current_dir(&self.cwd),
            Duration::from_secs(self.config.timeout_secs),
        )
        .await
        {
            Ok(out) if out.success() => Ok(Verdict::pass(out.summary())),
            Ok(out) => Ok(Verdict::fail(out.summary())),
            Err(e @ ConductorError::Timeout { .. }) => Ok(Verdict::fail(e.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
