//! Built-in self-test (BIST) for generated files.
//!
//! A generated file is its own test: it is executed with the interpreter
//! registered for its extension and passes when it exits 0 within the time
//! limit (and, under the stricter policy, prints the expected marker).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::blocks::FileBlock;
use crate::error::{ConductorError, Result};
use crate::process::{run_with_timeout, CommandSpec};

/// Self-test settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BistConfig {
    /// Hard limit per file; the child is killed when it passes.
    pub timeout_secs: u64,
    /// When set, stdout must also contain this text.
    pub expect_stdout: Option<String>,
    /// Extension (lowercase, no dot) to interpreter command.
    pub interpreters: BTreeMap<String, Vec<String>>,
}

impl Default for BistConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            expect_stdout: None,
            interpreters: default_interpreters(),
        }
    }
}

fn default_interpreters() -> BTreeMap<String, Vec<String>> {
    let python = if cfg!(windows) { "python" } else { "python3" };
    [
        ("py", python),
        ("sh", "sh"),
        ("js", "node"),
        ("rb", "ruby"),
        ("pl", "perl"),
    ]
    .into_iter()
    .map(|(ext, cmd)| (ext.to_string(), vec![cmd.to_string()]))
    .collect()
}

/// Executes generated files.
#[derive(Debug, Clone, Default)]
pub struct SelfTestRunner {
    config: BistConfig,
}

impl SelfTestRunner {
    #[must_use]
    pub fn new(config: BistConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &BistConfig {
        &self.config
    }

    /// The interpreter command for `block`, if one is registered.
    #[must_use]
    pub fn interpreter_for(&self, block: &FileBlock) -> Option<&[String]> {
        let ext = block.extension()?;
        self.config
            .interpreters
            .get(&ext)
            .filter(|cmd| !cmd.is_empty())
            .map(Vec::as_slice)
    }

    #[must_use]
    pub fn is_runnable(&self, block: &FileBlock) -> bool {
        self.interpreter_for(block).is_some()
    }

    /// Run one file that has already been written under `workspace`.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::SelfTest`] on a non-zero exit, a missing
    /// stdout marker, or an interpreter that cannot start, and
    /// [`ConductorError::Timeout`] when the time limit is hit.
    pub async fn run(&self, workspace: &Path, block: &FileBlock) -> Result<()> {
        let Some(interpreter) = self.interpreter_for(block) else {
            return Err(ConductorError::self_test(
                &block.filename,
                "no interpreter registered",
            ));
        };
        let relative = block.relative_path()?;

        let mut args: Vec<String> = interpreter[1..].to_vec();
        args.push(relative.to_string_lossy().into_owned());

        debug!("BIST {} via {}", block.filename, interpreter[0]);
        let output = run_with_timeout(
            CommandSpec::new(&interpreter[0], &args).current_dir(workspace),
            Duration::from_secs(self.config.timeout_secs),
        )
        .await
        .map_err(|e| match e {
            ConductorError::Timeout { secs, .. } => ConductorError::Timeout {
                what: format!("self-test of {}", block.filename),
                secs,
            },
            ConductorError::Io(e) => ConductorError::self_test(
                &block.filename,
                format!("cannot start {}: {e}", interpreter[0]),
            ),
            other => other,
        })?;

        if !output.success() {
            return Err(ConductorError::self_test(
                &block.filename,
                format!("exit {:?}: {}", output.code, output.summary()),
            ));
        }

        if let Some(expected) = &self.config.expect_stdout {
            if !output.stdout.contains(expected.as_str()) {
                return Err(ConductorError::self_test(
                    &block.filename,
                    format!("stdout did not contain {expected:?}"),
                ));
            }
        }

        info!("BIST PASS {}", block.filename);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, block: &FileBlock) {
        std::fs::write(dir.join(&block.filename), &block.content).unwrap();
    }

    #[test]
    fn test_default_interpreters() {
        let runner = SelfTestRunner::default();
        assert!(runner.is_runnable(&FileBlock::new("a.sh", "")));
        assert!(runner.is_runnable(&FileBlock::new("a.PY", "")));
        assert!(!runner.is_runnable(&FileBlock::new("README.md", "")));
        assert!(!runner.is_runnable(&FileBlock::new("Makefile", "")));
        assert_eq!(runner.config().timeout_secs, 30);
    }

    #[tokio::test]
    async fn test_passing_script() {
        let dir = TempDir::new().unwrap();
        let block = FileBlock::new("ok.sh", "echo fine\nexit 0\n");
        write(dir.path(), &block);
        SelfTestRunner::default().run(dir.path(), &block).await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_script() {
        let dir = TempDir::new().unwrap();
        let block = FileBlock::new("bad.sh", "echo broken >&2\nexit 2\n");
        write(dir.path(), &block);
        let err = SelfTestRunner::default()
            .run(dir.path(), &block)
            .await
            .unwrap_err();
        match err {
            ConductorError::SelfTest { file, message } => {
                assert_eq!(file, "bad.sh");
                assert!(message.contains("broken"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let dir = TempDir::new().unwrap();
        let block = FileBlock::new("slow.sh", "sleep 10\n");
        write(dir.path(), &block);
        let runner = SelfTestRunner::new(BistConfig {
            timeout_secs: 1,
            ..BistConfig::default()
        });
        let err = runner.run(dir.path(), &block).await.unwrap_err();
        assert!(err.to_string().contains("self-test of slow.sh timed out"));
    }

    #[tokio::test]
    async fn test_expect_stdout_policy() {
        let dir = TempDir::new().unwrap();
        let block = FileBlock::new("quiet.sh", "exit 0\n");
        write(dir.path(), &block);
        let runner = SelfTestRunner::new(BistConfig {
            expect_stdout: Some("Task completed".into()),
            ..BistConfig::default()
        });
        assert!(runner.run(dir.path(), &block).await.is_err());

        let loud = FileBlock::new("loud.sh", "echo 'Task completed'\n");
        write(dir.path(), &loud);
        runner.run(dir.path(), &loud).await.unwrap();
    }

    #[tokio::test]
    async fn test_sibling_files_are_visible() {
        let dir = TempDir::new().unwrap();
        let lib = FileBlock::new("lib.sh", "greet() { echo hi; }\n");
        let main = FileBlock::new("main.sh", ". ./lib.sh\ngreet\n");
        write(dir.path(), &lib);
        write(dir.path(), &main);
        SelfTestRunner::default().run(dir.path(), &main).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_self_test_failure() {
        let dir = TempDir::new().unwrap();
        let block = FileBlock::new("x.sh", "exit 0\n");
        write(dir.path(), &block);
        let mut config = BistConfig::default();
        config
            .interpreters
            .insert("sh".into(), vec!["definitely-not-a-shell-xyz".into()]);

        let err = SelfTestRunner::new(config)
            .run(dir.path(), &block)
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::SelfTest { .. }));
        assert!(err.is_recoverable());
    }
}
