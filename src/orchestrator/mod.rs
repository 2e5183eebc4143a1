//! The plan → build → verify → debug state machine.
//!
//! [`Orchestrator`] owns the run state, the [`LoopGuardian`], and the task
//! runner. Each pass of the main loop handles the current state, counts an
//! iteration, publishes `state/status.json`, drains the operator inbox, and
//! checks the guardian ceilings:
//!
//! ```text
//! Planning ──▶ Building ──▶ Verifying ──▶ Complete
//!                 ▲   │          │
//!                 │   ▼          ▼
//!                 └─ Debugging ◀─┘ ──▶ Failed (retries exhausted)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use conductor::orchestrator::{Orchestrator, OrchestratorDeps};
//!
//! let mut orchestrator = Orchestrator::new(project_dir, &config, deps);
//! let outcome = orchestrator.run("add a csv parser").await?;
//! std::process::exit(outcome.exit_code());
//! ```

pub mod commands;
pub mod persistence;
pub mod planning;
pub mod state;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::activity::{emit, ActivitySink, ActivityStatus, ORCHESTRATOR_ID};
use crate::collaborators::{ApprovalDecision, ApprovalGate, ContextSource, Generator, Verifier};
use crate::config::ConductorConfig;
use crate::error::{ConductorError, Result};
use crate::guardian::{LoopGuardian, TerminationReason};
use crate::isolation::{sanitize_branch_name, VersionControl};
use crate::task::{SelfTestRunner, TaskRunner};

use commands::{drain_inbox, Command};
use persistence::{StatePersistence, StatusSnapshot};
use planning::{first_open_item, plan_document, spec_document, PLAN_FILE, SPEC_FILE};
pub use state::{ComplexityMode, RunState, State, RUN_STATE_VERSION};

/// Collaborators injected into an [`Orchestrator`].
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub generator: Arc<dyn Generator>,
    pub vcs: Arc<dyn VersionControl>,
    pub verifier: Arc<dyn Verifier>,
    pub context: Arc<dyn ContextSource>,
    pub approval: Arc<dyn ApprovalGate>,
    pub activity: Arc<dyn ActivitySink>,
}

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureCause {
    Ceiling(TerminationReason),
    ApprovalRejected,
    ApprovalTimeout { secs: u64 },
    MissingPlan(PathBuf),
    RetriesExhausted { max_retries: u32 },
    Error(String),
}

impl FailureCause {
    /// Process exit status for this failure.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Ceiling(reason) => ConductorError::GuardianLimit {
                ceiling: reason.to_string(),
            }
            .exit_code(),
            Self::ApprovalTimeout { secs } => {
                ConductorError::ApprovalTimeout { secs: *secs }.exit_code()
            }
            _ => 1,
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ceiling(reason) => write!(f, "{reason}"),
            Self::ApprovalRejected => f.write_str("plan rejected by operator"),
            Self::ApprovalTimeout { secs } => write!(f, "plan approval timed out after {secs}s"),
            Self::MissingPlan(path) => write!(f, "plan not found at {}", path.display()),
            Self::RetriesExhausted { max_retries } => {
                write!(f, "max retries exceeded ({max_retries})")
            }
            Self::Error(message) => f.write_str(message),
        }
    }
}

/// How a call to [`Orchestrator::run`] or [`Orchestrator::resume`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Complete { iterations: u32 },
    Failed { cause: FailureCause, iterations: u32 },
    /// The operator paused; `session` can be resumed later.
    Paused { state: State, session: PathBuf },
}

impl RunOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    /// Human-readable failure reason.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Failed { cause, .. } => Some(cause.to_string()),
            _ => None,
        }
    }

    /// Pausing is not a failure.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Complete { .. } | Self::Paused { .. } => 0,
            Self::Failed { cause, .. } => cause.exit_code(),
        }
    }
}

/// Top-level control loop.
pub struct Orchestrator {
    config: ConductorConfig,
    deps: OrchestratorDeps,
    runner: TaskRunner,
    persistence: StatePersistence,
    guardian: LoopGuardian,
    state: State,
    mode: ComplexityMode,
    prompt: String,
    last_task: Option<String>,
    failure: Option<FailureCause>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(project_dir: impl AsRef<Path>, config: &ConductorConfig, deps: OrchestratorDeps) -> Self {
        let project_dir = project_dir.as_ref();
        let runner = TaskRunner::new(
            Arc::clone(&deps.generator),
            Arc::clone(&deps.vcs),
            Arc::clone(&deps.activity),
            project_dir,
        )
        .with_config(config.task.clone())
        .with_self_test(SelfTestRunner::new(config.bist.clone()));

        Self {
            persistence: StatePersistence::new(config.state_dir(project_dir)),
            guardian: LoopGuardian::new(config.guardian.clone()),
            state: State::Planning,
            mode: config.default_mode,
            prompt: String::new(),
            last_task: None,
            failure: None,
            config: config.clone(),
            deps,
            runner,
        }
    }

    /// Override the configured default mode for the next run.
    #[must_use]
    pub fn with_mode(mut self, mode: ComplexityMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn mode(&self) -> ComplexityMode {
        self.mode
    }

    #[must_use]
    pub fn guardian(&self) -> &LoopGuardian {
        &self.guardian
    }

    #[must_use]
    pub fn persistence(&self) -> &StatePersistence {
        &self.persistence
    }

    /// Start a fresh run for `prompt`.
    ///
    /// # Errors
    ///
    /// State-directory I/O, pause persistence, and fatal errors (see
    /// [`ConductorError::is_fatal`]) escape; anything else a pass fails on
    /// ends the run in `Failed` instead.
    pub async fn run(&mut self, prompt: &str) -> Result<RunOutcome> {
        self.prompt = prompt.trim().to_string();
        self.state = State::Planning;
        self.failure = None;
        self.last_task = None;
        self.guardian.reset();
        if self.persistence.clear_session()? {
            info!("Discarded the previous paused session");
        }

        info!("Starting run in {} mode", self.mode);
        self.emit(ActivityStatus::Started, format!("{} mode: {}", self.mode, self.prompt));
        self.drive().await
    }

    /// Continue the paused session with its saved mode.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Resume`] when there is no usable session.
    pub async fn resume(&mut self) -> Result<RunOutcome> {
        self.resume_run(None).await
    }

    /// Continue the paused session, optionally switching mode first.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Resume`] when there is no usable session.
    pub async fn resume_run(&mut self, mode: Option<ComplexityMode>) -> Result<RunOutcome> {
        let record = self.persistence.load_session()?;
        self.guardian.restore(&record.guardian_snapshot);
        self.state = record.current_state;
        self.mode = mode.unwrap_or(record.complexity_mode);
        self.prompt = record.prompt;
        self.failure = None;

        info!(
            "Resuming in {} ({} mode) at iteration {}",
            self.state,
            self.mode,
            self.guardian.iteration_count()
        );
        self.emit(
            ActivityStatus::Resumed,
            format!("state {}, mode {}", self.state, self.mode),
        );
        self.drive().await
    }

    /// Current run record.
    #[must_use]
    pub fn snapshot(&self) -> RunState {
        RunState {
            current_state: self.state,
            complexity_mode: self.mode,
            guardian_snapshot: self.guardian.snapshot(),
            timestamp: Utc::now(),
            version: RUN_STATE_VERSION,
            prompt: self.prompt.clone(),
        }
    }

    /// Observer view of the run.
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        let guardian = self.guardian.config();
        StatusSnapshot {
            state: self.state,
            complexity_mode: self.mode,
            iteration_count: self.guardian.iteration_count(),
            retry_count: self.guardian.retry_count(),
            elapsed_secs: self.guardian.elapsed().as_secs_f64(),
            max_iterations: guardian.max_iterations,
            max_time_minutes: guardian.max_time_minutes,
            last_task: self.last_task.clone(),
            reason: self.failure.as_ref().map(ToString::to_string),
            updated_at: Utc::now(),
        }
    }

    /// Save the session record so the run can be resumed.
    pub fn pause(&mut self) -> Result<PathBuf> {
        let path = self.persistence.save_session(&self.snapshot())?;
        info!("Paused in {}; session saved to {}", self.state, path.display());
        self.emit(ActivityStatus::Paused, format!("state {}", self.state));
        Ok(path)
    }

    /// Save a named checkpoint and return the label actually used.
    pub fn checkpoint(&mut self, label: &str) -> Result<String> {
        let mut label = sanitize_branch_name(label);
        if label.is_empty() {
            label = Utc::now().format("%Y%m%d%H%M%S").to_string();
        }
        let path = self.persistence.save_checkpoint(&label, &self.snapshot())?;
        info!("Checkpoint {label} saved to {}", path.display());
        self.emit(ActivityStatus::CheckpointCreated, label.clone());
        Ok(label)
    }

    /// Restore state and mode from a checkpoint. Guardian counters are kept.
    /// Returns `false` when no checkpoint has that label.
    pub fn rollback(&mut self, label: &str) -> Result<bool> {
        let label = sanitize_branch_name(label);
        let Some(record) = self.persistence.load_checkpoint(&label)? else {
            warn!("No checkpoint named '{label}', ignoring rollback");
            return Ok(false);
        };
        info!(
            "Rolling back to {label}: {} -> {} ({} mode)",
            self.state, record.current_state, record.complexity_mode
        );
        self.state = record.current_state;
        self.mode = record.complexity_mode;
        if !self.state.is_terminal() {
            self.failure = None;
        }
        Ok(true)
    }

    async fn drive(&mut self) -> Result<RunOutcome> {
        fs::create_dir_all(self.persistence.dir())?;

        loop {
            if !self.state.is_terminal() {
                if let Some(reason) = self.guardian.termination_reason() {
                    self.fail(FailureCause::Ceiling(reason));
                }
            }
            if self.state.is_terminal() {
                break;
            }

            self.emit(ActivityStatus::Running, format!("Entering state: {}", self.state));
            let next = match self.step().await {
                Ok(next) => next,
                Err(e) if e.is_fatal() => {
                    self.emit(ActivityStatus::Error, format!("{}: {e}", self.state));
                    return Err(e);
                }
                Err(e) => {
                    warn!("Error in {}: {e}", self.state);
                    self.emit(ActivityStatus::Error, format!("{}: {e}", self.state));
                    self.failure = Some(FailureCause::Error(e.to_string()));
                    State::Failed
                }
            };
            self.transition(next);
            self.guardian.increment_iteration();
            self.publish_status();

            if self.process_inbox() {
                let session = self.pause()?;
                self.publish_status();
                return Ok(RunOutcome::Paused {
                    state: self.state,
                    session,
                });
            }

            if self.state.is_terminal() {
                break;
            }
            if let Some(reason) = self.guardian.termination_reason() {
                self.fail(FailureCause::Ceiling(reason));
                break;
            }

            if self.config.tick_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.tick_ms)).await;
            }
        }

        self.publish_status();
        Ok(self.finish())
    }

    async fn step(&mut self) -> Result<State> {
        match self.state {
            State::Planning => self.handle_planning().await,
            State::Building => self.handle_building().await,
            State::Verifying => Ok(self.handle_verifying().await),
            State::Debugging => Ok(self.handle_debugging()),
            terminal => Ok(terminal),
        }
    }

    async fn handle_planning(&mut self) -> Result<State> {
        let dir = self.persistence.dir();
        let plan = plan_document(&self.prompt, self.mode);
        fs::write(dir.join(SPEC_FILE), spec_document(&self.prompt, self.mode))?;
        fs::write(dir.join(PLAN_FILE), &plan)?;
        info!("Wrote {} plan to {}", self.mode, dir.join(PLAN_FILE).display());

        if !self.mode.requires_approval() {
            return Ok(State::Building);
        }

        let secs = self.config.approval_timeout_secs;
        let summary = format!("{} plan for: {}\n\n{plan}", self.mode, self.prompt);
        let decision = self
            .deps
            .approval
            .await_approval(&summary, Duration::from_secs(secs))
            .await
            .map_err(ConductorError::from_collaborator)?;
        info!("Plan approval: {decision}");

        Ok(match decision {
            ApprovalDecision::Approved => State::Building,
            ApprovalDecision::Rejected => {
                self.failure = Some(FailureCause::ApprovalRejected);
                State::Failed
            }
            ApprovalDecision::TimedOut => {
                self.failure = Some(FailureCause::ApprovalTimeout { secs });
                State::Failed
            }
        })
    }

    async fn handle_building(&mut self) -> Result<State> {
        let plan_path = self.persistence.dir().join(PLAN_FILE);
        let plan = match fs::read_to_string(&plan_path) {
            Ok(plan) => plan,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.failure = Some(FailureCause::MissingPlan(plan_path));
                return Ok(State::Failed);
            }
            Err(e) => return Err(e.into()),
        };

        let query = first_open_item(&plan).unwrap_or(self.prompt.as_str());
        let context = match self.deps.context.fetch(query).await {
            Ok(context) => context,
            Err(e) => {
                warn!("Context lookup failed, building without it: {e:#}");
                String::new()
            }
        };
        debug!("Context for '{query}': {} bytes", context.len());

        let max_attempts = self.guardian.config().max_iterations;
        let report = self
            .runner
            .execute(&mut self.guardian, &plan, &context, self.mode, max_attempts, None)
            .await;
        self.last_task = Some(report.task_id.clone());

        if report.success {
            Ok(State::Verifying)
        } else {
            if let Some(error) = &report.last_error {
                warn!("Task {} failed: {error}", report.task_id);
            }
            Ok(State::Debugging)
        }
    }

    async fn handle_verifying(&mut self) -> State {
        match self.deps.verifier.verify().await {
            Ok(verdict) if verdict.passed => State::Complete,
            Ok(verdict) => {
                warn!("Verification failed: {}", verdict.diagnostic);
                State::Debugging
            }
            Err(e) => {
                warn!("Verifier error: {e:#}");
                State::Debugging
            }
        }
    }

    fn handle_debugging(&mut self) -> State {
        let retries = self.guardian.retry_count();
        let max_retries = self.config.max_retries;
        if retries >= max_retries {
            self.failure = Some(FailureCause::RetriesExhausted { max_retries });
            return State::Failed;
        }

        let temperature = self.guardian.escalated_temperature(retries);
        info!(
            "Retry {}/{max_retries} at temperature {temperature:.1}",
            retries + 1
        );
        self.guardian.increment_retry();
        State::Building
    }

    fn transition(&mut self, next: State) {
        if next != self.state {
            info!("{} -> {next}", self.state);
            self.state = next;
        }
    }

    fn fail(&mut self, cause: FailureCause) {
        warn!("Run failed: {cause}");
        self.failure = Some(cause);
        self.transition(State::Failed);
    }

    /// Apply queued commands; returns whether a pause was requested.
    fn process_inbox(&mut self) -> bool {
        let commands = match drain_inbox(self.persistence.dir()) {
            Ok(commands) => commands,
            Err(e) => {
                warn!("Failed to drain inbox: {e}");
                return false;
            }
        };

        let mut pause = false;
        for command in commands {
            debug!("Inbox command: {}", command.to_line());
            match command {
                Command::Pause => pause = true,
                Command::Checkpoint(label) => {
                    if let Err(e) = self.checkpoint(&label) {
                        warn!("Checkpoint failed: {e}");
                    }
                }
                Command::Rollback(label) => {
                    if let Err(e) = self.rollback(&label) {
                        warn!("Rollback failed: {e}");
                    }
                }
            }
        }
        pause
    }

    fn publish_status(&self) {
        if let Err(e) = self.persistence.write_status(&self.status()) {
            warn!("Failed to publish status: {e}");
        }
    }

    fn finish(&mut self) -> RunOutcome {
        let iterations = self.guardian.iteration_count();
        if self.state == State::Complete {
            info!("Run complete after {iterations} iteration(s)");
            self.emit(ActivityStatus::Completed, format!("{iterations} iteration(s)"));
            RunOutcome::Complete { iterations }
        } else {
            let cause = self
                .failure
                .clone()
                .unwrap_or_else(|| FailureCause::Error("run ended in failed state".to_string()));
            self.emit(ActivityStatus::Failed, cause.to_string());
            RunOutcome::Failed { cause, iterations }
        }
    }

    fn emit(&self, status: ActivityStatus, details: impl Into<String>) {
        emit(
            self.deps.activity.as_ref(),
            ORCHESTRATOR_ID,
            self.guardian.iteration_count(),
            status,
            details,
        );
    }
}
