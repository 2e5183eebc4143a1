//! Generator backed by an external command.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Generation, Generator};
use crate::process::{run_with_timeout, CommandSpec};

/// Environment variable carrying the attempt temperature.
pub const TEMPERATURE_ENV: &str = "CONDUCTOR_TEMPERATURE";

/// Generator command settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Program and arguments. Empty means no generator is configured.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 600,
        }
    }
}

/// Runs a command with the prompt on stdin and reads the transcript from stdout.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    timeout: Duration,
}

impl CommandGenerator {
    /// # Errors
    ///
    /// Fails when the configured command is empty.
    pub fn from_config(config: &GeneratorConfig, cwd: impl AsRef<Path>) -> Result<Self> {
        let Some((program, args)) = config.command.split_first() else {
            bail!("generator.command is not configured");
        };
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            cwd: cwd.as_ref().to_path_buf(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

/// The prompt sent to a command generator.
#[must_use]
pub fn compose_prompt(plan: &str, context: &str) -> String {
    let mut prompt = format!("# Plan\n\n{}\n", plan.trim_end());
    if !context.trim().is_empty() {
        prompt.push_str("\n# Context\n\n");
        prompt.push_str(context.trim_end());
        prompt.push('\n');
    }
    prompt
}

#[async_trait]
impl Generator for CommandGenerator {
    async fn generate(&self, plan: &str, context: &str, temperature: f64) -> Result<Generation> {
        let prompt = compose_prompt(plan, context);
        debug!(temperature, "invoking generator {}", self.program);

        let output = run_with_timeout(
            CommandSpec::new(&self.program, &self.args)
                .current_dir(&self.cwd)
                .stdin(&prompt)
                .env(TEMPERATURE_ENV, format!("{temperature:.2}")),
            self.timeout,
        )
        .await?;

        if !output.success() {
            bail!("generator exited with {:?}: {}", output.code, output.summary());
        }
        Ok(Generation::from_transcript(output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_command_rejected() {
        let err = CommandGenerator::from_config(&GeneratorConfig::default(), ".").unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn test_compose_prompt() {
        let prompt = compose_prompt("add two numbers", "");
        assert_eq!(prompt, "# Plan\n\nadd two numbers\n");
        let prompt = compose_prompt("p", "--- FILE: a.py ---\n");
        assert!(prompt.contains("# Context\n\n--- FILE: a.py ---"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_generator_passes_prompt_and_temperature() {
        let dir = TempDir::new().unwrap();
        let config = GeneratorConfig {
            command: vec![
                "sh".into(),
                "-c".into(),
                "cat >/dev/null; printf '# filename: t.sh\\necho %s\\n' \"$CONDUCTOR_TEMPERATURE\""
                    .into(),
            ],
            timeout_secs: 10,
        };
        let generator = CommandGenerator::from_config(&config, dir.path()).unwrap();
        let generation = generator.generate("plan", "", 1.0).await.unwrap();
        assert_eq!(generation.blocks.len(), 1);
        assert_eq!(generation.blocks[0].content, "echo 1.00\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_generator_failure() {
        let dir = TempDir::new().unwrap();
        let config = GeneratorConfig {
            command: vec!["sh".into(), "-c".into(), "echo quota >&2; exit 1".into()],
            timeout_secs: 10,
        };
        let generator = CommandGenerator::from_config(&config, dir.path()).unwrap();
        let err = generator.generate("plan", "", 0.7).await.unwrap_err();
        assert!(err.to_string().contains("quota"));
    }
}
