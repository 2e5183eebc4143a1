//! Conductor - a bounded supervisor for code-generation agents
//!
//! Conductor drives a plan → build → verify → debug loop around a pluggable
//! generator. Every build attempt runs in a disposable workspace and must
//! pass its own self-test before it is persisted and committed on an isolated
//! branch. A loop guardian caps iterations and wall time, escalates the
//! sampling temperature on retries, and notices when the generator keeps
//! producing the same output.
//!
//! # Architecture
//!
//! - [`guardian`] - Resource ceilings, retry temperature, and loop detection
//! - [`isolation`] - Task branches and commits via a local control service or `git`
//! - [`task`] - One isolated, self-tested build
//! - [`orchestrator`] - The state machine, pause/resume, and the operator inbox
//! - [`collaborators`] - Generator, context, verifier, and approval seams
//! - [`activity`] - JSONL activity log
//! - [`config`] - Layered configuration loading and validation
//! - [`error`] - Custom error types and handling
//! - [`testing`] - Mocks for every collaborator
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use conductor::{ConductorConfig, Orchestrator, OrchestratorDeps};
//! use conductor::testing::*;
//!
//! let config = ConductorConfig::load(project_dir, None)?;
//! let deps = OrchestratorDeps {
//!     generator: Arc::new(MockGenerator::new().repeat("# filename: t.sh\nexit 0\n")),
//!     vcs: Arc::new(MockVersionControl::new()),
//!     verifier: Arc::new(MockVerifier::new()),
//!     context: Arc::new(MockContextSource::new()),
//!     approval: Arc::new(MockApproval::new()),
//!     activity: Arc::new(MemoryActivityLog::new()),
//! };
//! let outcome = Orchestrator::new(project_dir, &config, deps).run("say hi").await?;
//! ```

pub mod activity;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod guardian;
pub mod isolation;
pub mod orchestrator;
pub mod process;
pub mod task;
pub mod testing;

pub use error::{ConductorError, Result};

pub use config::{ConductorConfig, ConfigLoader};

pub use guardian::{GuardianConfig, GuardianSnapshot, LoopGuardian, TerminationReason};

pub use orchestrator::{
    ComplexityMode, FailureCause, Orchestrator, OrchestratorDeps, RunOutcome, RunState, State,
};

pub use task::{TaskReport, TaskRunner};
