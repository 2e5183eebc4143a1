//! Mock implementations of the collaborator traits.
//!
//! Every mock is cheaply cloneable and shares its recorded state between
//! clones, so a test can hand one clone to the code under test and inspect
//! another afterwards.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::activity::{ActivityEvent, ActivitySink, ActivityStatus};
use crate::collaborators::{
    ApprovalDecision, ApprovalGate, ContextSource, Generation, Generator, Verdict, Verifier,
};
use crate::error::{ConductorError, Result as ConductorResult};
use crate::isolation::VersionControl;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking test thread must not poison assertions in another.
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

type Scripted = std::result::Result<String, String>;

#[derive(Debug, Default)]
struct GeneratorState {
    script: VecDeque<Scripted>,
    fallback: Option<Scripted>,
    calls: Vec<(String, f64)>,
}

/// Generator that replays scripted transcripts.
///
/// # Example
///
/// ```rust,ignore
/// let generator = MockGenerator::new()
///     .then("# filename: t.sh\nexit 1\n")
///     .repeat("# filename: t.sh\nexit 0\n");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockGenerator {
    state: Arc<Mutex<GeneratorState>>,
}

impl MockGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one transcript.
    #[must_use]
    pub fn then(self, transcript: &str) -> Self {
        lock(&self.state)
            .script
            .push_back(Ok(transcript.to_string()));
        self
    }

    /// Queue one generation error.
    #[must_use]
    pub fn then_fail(self, message: &str) -> Self {
        lock(&self.state).script.push_back(Err(message.to_string()));
        self
    }

    /// Transcript returned once the queue is empty.
    #[must_use]
    pub fn repeat(self, transcript: &str) -> Self {
        lock(&self.state).fallback = Some(Ok(transcript.to_string()));
        self
    }

    /// Error returned once the queue is empty.
    #[must_use]
    pub fn fail_with(self, message: &str) -> Self {
        lock(&self.state).fallback = Some(Err(message.to_string()));
        self
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        lock(&self.state).calls.len()
    }

    /// Temperature of every call, in order.
    #[must_use]
    pub fn temperatures(&self) -> Vec<f64> {
        lock(&self.state).calls.iter().map(|(_, t)| *t).collect()
    }

    /// Plan text of every call, in order.
    #[must_use]
    pub fn plans(&self) -> Vec<String> {
        lock(&self.state).calls.iter().map(|(p, _)| p.clone()).collect()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, plan: &str, _context: &str, temperature: f64) -> Result<Generation> {
        let mut state = lock(&self.state);
        state.calls.push((plan.to_string(), temperature));
        let next = match state.script.pop_front() {
            Some(next) => next,
            None => state
                .fallback
                .clone()
                .ok_or_else(|| anyhow!("mock generator script exhausted"))?,
        };
        match next {
            Ok(transcript) => Ok(Generation::from_transcript(transcript)),
            Err(message) => bail!("{message}"),
        }
    }
}

#[derive(Debug, Default)]
struct VcsState {
    branches: Vec<String>,
    switches: Vec<String>,
    commits: Vec<String>,
    fail_branches: bool,
    fail_commits: bool,
}

/// Version control that records operations instead of running them.
#[derive(Debug, Clone, Default)]
pub struct MockVersionControl {
    state: Arc<Mutex<VcsState>>,
}

impl MockVersionControl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make branch creation and checkout fail.
    #[must_use]
    pub fn failing_branches(self) -> Self {
        lock(&self.state).fail_branches = true;
        self
    }

    /// Make commits fail.
    #[must_use]
    pub fn failing_commits(self) -> Self {
        lock(&self.state).fail_commits = true;
        self
    }

    #[must_use]
    pub fn commit_count(&self) -> usize {
        lock(&self.state).commits.len()
    }

    #[must_use]
    pub fn commit_messages(&self) -> Vec<String> {
        lock(&self.state).commits.clone()
    }

    /// Branches created, in order.
    #[must_use]
    pub fn branches(&self) -> Vec<String> {
        lock(&self.state).branches.clone()
    }

    /// Branches checked out, in order.
    #[must_use]
    pub fn switches(&self) -> Vec<String> {
        lock(&self.state).switches.clone()
    }
}

#[async_trait]
impl VersionControl for MockVersionControl {
    async fn create_branch(&self, name: &str) -> ConductorResult<()> {
        let mut state = lock(&self.state);
        if state.fail_branches {
            return Err(ConductorError::isolation("create_branch", "mock failure"));
        }
        state.branches.push(name.to_string());
        Ok(())
    }

    async fn switch_branch(&self, name: &str) -> ConductorResult<()> {
        let mut state = lock(&self.state);
        if state.fail_branches {
            return Err(ConductorError::isolation("switch_branch", "mock failure"));
        }
        state.switches.push(name.to_string());
        Ok(())
    }

    async fn commit(&self, message: &str) -> bool {
        let mut state = lock(&self.state);
        if state.fail_commits {
            return false;
        }
        state.commits.push(message.to_string());
        true
    }
}

#[derive(Debug, Default)]
struct VerifierState {
    script: VecDeque<Verdict>,
    calls: usize,
}

/// Verifier returning scripted verdicts, passing once the script runs out.
#[derive(Debug, Clone, Default)]
pub struct MockVerifier {
    state: Arc<Mutex<VerifierState>>,
}

impl MockVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn then_pass(self) -> Self {
        lock(&self.state).script.push_back(Verdict::pass("mock pass"));
        self
    }

    #[must_use]
    pub fn then_fail(self, diagnostic: &str) -> Self {
        lock(&self.state).script.push_back(Verdict::fail(diagnostic));
        self
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        lock(&self.state).calls
    }
}

#[async_trait]
impl Verifier for MockVerifier {
    async fn verify(&self) -> Result<Verdict> {
        let mut state = lock(&self.state);
        state.calls += 1;
        Ok(state
            .script
            .pop_front()
            .unwrap_or_else(|| Verdict::pass("mock pass")))
    }
}

/// Context source returning fixed text and recording queries.
#[derive(Debug, Clone, Default)]
pub struct MockContextSource {
    context: String,
    queries: Arc<Mutex<Vec<String>>>,
}

impl MockContextSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_context(mut self, context: &str) -> Self {
        self.context = context.to_string();
        self
    }

    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl ContextSource for MockContextSource {
    async fn fetch(&self, query: &str) -> Result<String> {
        lock(&self.queries).push(query.to_string());
        Ok(self.context.clone())
    }
}

/// Approval gate with a fixed answer.
#[derive(Debug, Clone)]
pub struct MockApproval {
    decision: ApprovalDecision,
    config_error: Option<String>,
    requests: Arc<Mutex<Vec<(String, Duration)>>>,
}

impl Default for MockApproval {
    fn default() -> Self {
        Self {
            decision: ApprovalDecision::Approved,
            config_error: None,
            requests: Arc::default(),
        }
    }
}

impl MockApproval {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_decision(mut self, decision: ApprovalDecision) -> Self {
        self.decision = decision;
        self
    }

    /// Fail every request with a configuration error.
    #[must_use]
    pub fn failing_config(mut self, message: &str) -> Self {
        self.config_error = Some(message.to_string());
        self
    }

    /// Summaries the gate was asked to approve.
    #[must_use]
    pub fn summaries(&self) -> Vec<String> {
        lock(&self.requests).iter().map(|(s, _)| s.clone()).collect()
    }

    /// Timeouts the gate was asked to wait for.
    #[must_use]
    pub fn timeouts(&self) -> Vec<Duration> {
        lock(&self.requests).iter().map(|(_, t)| *t).collect()
    }
}

#[async_trait]
impl ApprovalGate for MockApproval {
    async fn await_approval(&self, summary: &str, timeout: Duration) -> Result<ApprovalDecision> {
        lock(&self.requests).push((summary.to_string(), timeout));
        if let Some(message) = &self.config_error {
            return Err(ConductorError::config(message.clone()).into());
        }
        Ok(self.decision)
    }
}

/// In-memory activity sink.
#[derive(Debug, Clone, Default)]
pub struct MemoryActivityLog {
    events: Arc<Mutex<Vec<ActivityEvent>>>,
}

impl MemoryActivityLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<ActivityEvent> {
        lock(&self.events).clone()
    }

    #[must_use]
    pub fn statuses(&self) -> Vec<ActivityStatus> {
        lock(&self.events).iter().map(|e| e.status).collect()
    }
}

impl ActivitySink for MemoryActivityLog {
    fn record(&self, event: &ActivityEvent) -> Result<()> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}
