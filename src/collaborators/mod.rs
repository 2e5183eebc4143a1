//! Seams to the outside world.
//!
//! The orchestrator and task runner only see these traits; concrete
//! implementations run configured commands or scan the project, and
//! [`crate::testing`] provides scripted mocks.

mod approval;
mod context;
mod generator;
mod verifier;

pub use approval::{AutoApprove, FileApproval, APPROVAL_FILE, PENDING_APPROVAL_FILE};
pub use context::{ContextConfig, ScanContextSource};
pub use generator::{CommandGenerator, GeneratorConfig, TEMPERATURE_ENV};
pub use verifier::{CommandVerifier, VerifyConfig};

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::task::blocks::{parse_blocks, FileBlock};

/// Output of one generation call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    /// Everything the generator said, used for loop detection.
    pub transcript: String,
    pub blocks: Vec<FileBlock>,
}

impl Generation {
    /// Parse file blocks out of a raw transcript.
    #[must_use]
    pub fn from_transcript(transcript: impl Into<String>) -> Self {
        let transcript = transcript.into();
        let blocks = parse_blocks(&transcript);
        Self { transcript, blocks }
    }
}

/// Produces code for a plan.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate one attempt.
    ///
    /// # Errors
    ///
    /// Any error is local to the attempt; the task runner retries.
    async fn generate(&self, plan: &str, context: &str, temperature: f64) -> Result<Generation>;
}

/// Retrieves project context relevant to a query.
#[async_trait]
pub trait ContextSource: Send + Sync {
    /// # Errors
    ///
    /// Returns an error only when no strategy could run at all.
    async fn fetch(&self, query: &str) -> Result<String>;
}

/// Result of a verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    pub diagnostic: String,
}

impl Verdict {
    #[must_use]
    pub fn pass(diagnostic: impl Into<String>) -> Self {
        Self {
            passed: true,
            diagnostic: diagnostic.into(),
        }
    }

    #[must_use]
    pub fn fail(diagnostic: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostic: diagnostic.into(),
        }
    }
}

/// Checks the workspace after a successful build.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// # Errors
    ///
    /// An error is treated as a failed verdict by the orchestrator.
    async fn verify(&self) -> Result<Verdict>;
}

/// Operator answer to a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    TimedOut,
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approved => f.write_str("approved"),
            Self::Rejected => f.write_str("rejected"),
            Self::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Blocks until a plan is approved, rejected, or the wait runs out.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the approval channel itself is broken.
    async fn await_approval(&self, summary: &str, timeout: Duration) -> Result<ApprovalDecision>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_from_transcript() {
        let generation =
            Generation::from_transcript("thinking...\n# filename: t.sh\nexit 0\n");
        assert_eq!(generation.blocks.len(), 1);
        assert!(generation.transcript.starts_with("thinking"));
    }

    #[test]
    fn test_verdict_constructors() {
        assert!(Verdict::pass("ok").passed);
        assert!(!Verdict::fail("nope").passed);
        assert_eq!(ApprovalDecision::TimedOut.to_string(), "timed out");
    }
}
