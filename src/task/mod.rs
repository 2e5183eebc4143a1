//! Task runner: one isolated, self-verified build of a plan item.
//!
//! Each call to [`TaskRunner::execute`] gets a fresh task id and branch,
//! then makes up to `max_iterations` generation attempts. Every attempt is
//! written into a disposable workspace and self-tested; the first attempt
//! whose files all pass is copied into the permanent output directory and
//! committed. The guardian supplies the retry temperature and decides when
//! repeated failures are a loop worth escalating past the attempt ceiling.

pub mod bist;
pub mod blocks;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::activity::{emit, ActivitySink, ActivityStatus};
use crate::collaborators::{Generation, Generator};
use crate::error::{ConductorError, Result};
use crate::guardian::LoopGuardian;
use crate::isolation::{sanitize_branch_name, VersionControl};
use crate::orchestrator::state::ComplexityMode;

pub use bist::{BistConfig, SelfTestRunner};
pub use blocks::{parse_blocks, FileBlock};

/// Task runner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Failed attempts after which the runner gives up unless a loop was
    /// detected on the latest attempt.
    pub attempt_ceiling: u32,
    /// Root of the permanent output tree, relative to the project directory.
    pub output_root: PathBuf,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            attempt_ceiling: 3,
            output_root: PathBuf::from("tests"),
        }
    }
}

/// Outcome of one [`TaskRunner::execute`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub success: bool,
    pub task_id: String,
    pub branch: String,
    /// Generation attempts made.
    pub attempts: u32,
    /// Where artifacts were persisted, if any were.
    pub output_dir: Option<PathBuf>,
    pub committed: bool,
    /// Success came from the completion marker with no files.
    pub completion_promised: bool,
    pub last_error: Option<String>,
}

impl TaskReport {
    fn new(task_id: &str, branch: &str) -> Self {
        Self {
            success: false,
            task_id: task_id.to_string(),
            branch: branch.to_string(),
            attempts: 0,
            output_dir: None,
            committed: false,
            completion_promised: false,
            last_error: None,
        }
    }
}

/// 8 hex characters from a random UUID.
#[must_use]
pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// `<root>/<YYYYMonDD>/<HHMMSS>_<task_id>`.
#[must_use]
pub fn output_dir_for(root: &Path, task_id: &str, at: DateTime<Local>) -> PathBuf {
    root.join(at.format("%Y%b%d").to_string())
        .join(format!("{}_{task_id}", at.format("%H%M%S")))
}

/// Executes build tasks.
pub struct TaskRunner {
    generator: Arc<dyn Generator>,
    vcs: Arc<dyn VersionControl>,
    activity: Arc<dyn ActivitySink>,
    bist: SelfTestRunner,
    config: TaskConfig,
    project_dir: PathBuf,
}

impl TaskRunner {
    #[must_use]
    pub fn new(
        generator: Arc<dyn Generator>,
        vcs: Arc<dyn VersionControl>,
        activity: Arc<dyn ActivitySink>,
        project_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            generator,
            vcs,
            activity,
            bist: SelfTestRunner::default(),
            config: TaskConfig::default(),
            project_dir: project_dir.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_self_test(mut self, bist: SelfTestRunner) -> Self {
        self.bist = bist;
        self
    }

    fn output_root(&self) -> PathBuf {
        if self.config.output_root.is_absolute() {
            self.config.output_root.clone()
        } else {
            self.project_dir.join(&self.config.output_root)
        }
    }

    /// Build one task. `workspace` overrides the disposable directory, which
    /// is otherwise a fresh temporary directory removed on return.
    pub async fn execute(
        &self,
        guardian: &mut LoopGuardian,
        plan: &str,
        context: &str,
        mode: ComplexityMode,
        max_iterations: u32,
        workspace: Option<&Path>,
    ) -> TaskReport {
        let task_id = new_task_id();
        let branch = sanitize_branch_name(&format!("task-{task_id}"));
        let mut report = TaskReport::new(&task_id, &branch);

        info!("Executing task {task_id} in {mode} mode on {branch}");
        emit(
            self.activity.as_ref(),
            &task_id,
            guardian.iteration_count(),
            ActivityStatus::Started,
            format!("{mode} mode, branch {branch}"),
        );

        if let Err(e) = self.prepare_branch(&branch).await {
            warn!("Branch setup failed, continuing on current branch: {e}");
        }

        // Held until return so the directory outlives every attempt.
        let scratch;
        let workspace = match workspace {
            Some(dir) => dir.to_path_buf(),
            None => match tempfile::Builder::new().prefix("conductor_task_").tempdir() {
                Ok(dir) => {
                    scratch = dir;
                    scratch.path().to_path_buf()
                }
                Err(e) => {
                    report.last_error = Some(format!("workspace: {e}"));
                    self.finish_failed(guardian, &report);
                    return report;
                }
            },
        };

        for attempt in 0..max_iterations {
            report.attempts = attempt + 1;
            let temperature = guardian.escalated_temperature(attempt);
            info!(
                "Attempt {}/{} (temp={temperature:.1})",
                attempt + 1,
                max_iterations
            );

            let mut stop = false;
            let (transcript, outcome) =
                match self.generator.generate(plan, context, temperature).await {
                    Ok(generation) => {
                        let outcome = self.attempt(guardian, &workspace, &generation).await;
                        (generation.transcript, outcome)
                    }
                    Err(e) => {
                        let err = ConductorError::generation(format!("{e:#}"));
                        (err.to_string(), Err(err))
                    }
                };

            match outcome {
                Ok(AttemptOutcome::CompletionPromised) => {
                    info!("Completion marker with no files; nothing to persist");
                    report.success = true;
                    report.completion_promised = true;
                    self.finish_completed(guardian, &report);
                    return report;
                }
                Ok(AttemptOutcome::Passed(blocks)) => {
                    match self.persist(&task_id, &workspace, &blocks) {
                        Ok(dir) => {
                            report.output_dir = Some(dir);
                            report.committed =
                                self.vcs.commit(&format!("Auto-commit task {task_id}")).await;
                            report.success = true;
                            self.finish_completed(guardian, &report);
                            return report;
                        }
                        Err(e) => {
                            warn!("Failed to persist artifacts: {e}");
                            report.last_error = Some(e.to_string());
                            stop = !e.is_recoverable();
                        }
                    }
                }
                Err(e) => {
                    warn!("Attempt {} failed: {e}", attempt + 1);
                    report.last_error = Some(e.to_string());
                    stop = !e.is_recoverable();
                }
            }

            emit(
                self.activity.as_ref(),
                &task_id,
                guardian.iteration_count(),
                ActivityStatus::Failed,
                format!(
                    "attempt {}: {}",
                    attempt + 1,
                    report.last_error.as_deref().unwrap_or("unknown")
                ),
            );

            if stop {
                warn!("Attempt {} hit an unrecoverable error, giving up", attempt + 1);
                break;
            }
            if guardian.detect_loop(&transcript) {
                warn!("Loop detected on attempt {}, escalating", attempt + 1);
                emit(
                    self.activity.as_ref(),
                    &task_id,
                    guardian.iteration_count(),
                    ActivityStatus::LoopDetected,
                    format!("attempt {}", attempt + 1),
                );
                continue;
            }
            if attempt + 1 >= self.config.attempt_ceiling {
                break;
            }
        }

        self.finish_failed(guardian, &report);
        report
    }

    async fn prepare_branch(&self, branch: &str) -> Result<()> {
        self.vcs.create_branch(branch).await?;
        self.vcs.switch_branch(branch).await
    }

    /// Write every block into a cleared workspace and self-test the runnable ones.
    async fn attempt(
        &self,
        guardian: &LoopGuardian,
        workspace: &Path,
        generation: &Generation,
    ) -> Result<AttemptOutcome> {
        if generation.blocks.is_empty() {
            if guardian.check_completion_promise(&generation.transcript) {
                return Ok(AttemptOutcome::CompletionPromised);
            }
            return Err(ConductorError::generation("no file blocks in output"));
        }

        clear_dir(workspace)?;
        for block in &generation.blocks {
            let path = workspace.join(block.relative_path()?);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, &block.content)?;
        }

        let runnable: Vec<&FileBlock> = generation
            .blocks
            .iter()
            .filter(|b| self.bist.is_runnable(b))
            .collect();
        if runnable.is_empty() {
            return Err(ConductorError::self_test(
                generation
                    .blocks
                    .iter()
                    .map(|b| b.filename.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                "no runnable file in attempt",
            ));
        }

        for block in runnable {
            self.bist.run(workspace, block).await?;
        }
        info!("All {} file(s) passed BIST", generation.blocks.len());
        Ok(AttemptOutcome::Passed(generation.blocks.clone()))
    }

    fn persist(&self, task_id: &str, workspace: &Path, blocks: &[FileBlock]) -> Result<PathBuf> {
        let target = output_dir_for(&self.output_root(), task_id, Local::now());
        fs::create_dir_all(&target)?;
        for block in blocks {
            let relative = block.relative_path()?;
            let dest = target.join(&relative);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(workspace.join(&relative), &dest)?;
            debug!("Persisted {}", dest.display());
        }
        info!("Persisted {} file(s) to {}", blocks.len(), target.display());
        Ok(target)
    }

    fn finish_completed(&self, guardian: &LoopGuardian, report: &TaskReport) {
        let details = match &report.output_dir {
            Some(dir) => format!("{} attempt(s), output {}", report.attempts, dir.display()),
            None => format!("{} attempt(s), completion marker", report.attempts),
        };
        emit(
            self.activity.as_ref(),
            &report.task_id,
            guardian.iteration_count(),
            ActivityStatus::Completed,
            details,
        );
    }

    fn finish_failed(&self, guardian: &LoopGuardian, report: &TaskReport) {
        warn!(
            "Task {} failed after {} attempt(s)",
            report.task_id, report.attempts
        );
        emit(
            self.activity.as_ref(),
            &report.task_id,
            guardian.iteration_count(),
            ActivityStatus::Failed,
            format!(
                "exhausted after {} attempt(s): {}",
                report.attempts,
                report.last_error.as_deref().unwrap_or("no attempts made")
            ),
        );
    }
}

enum AttemptOutcome {
    Passed(Vec<FileBlock>),
    CompletionPromised,
}

fn clear_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
