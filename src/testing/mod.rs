//! Testing infrastructure for conductor.
//!
//! Mocks for every collaborator trait, plus (in unit tests) a throwaway
//! project fixture. Mocks are public so integration tests and downstream
//! crates can drive an [`crate::orchestrator::Orchestrator`] without a real
//! generator, repository, or operator.
//!
//! # Example
//!
//! ```rust,ignore
//! use conductor::testing::{MockGenerator, MockVersionControl};
//!
//! let generator = MockGenerator::new().repeat("# filename: t.sh\nexit 0\n");
//! let vcs = MockVersionControl::new();
//! ```

#[cfg(test)]
pub mod fixtures;
pub mod mocks;

#[cfg(test)]
pub use fixtures::*;
pub use mocks::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{emit, ActivityStatus};
    use crate::collaborators::{ApprovalDecision, ApprovalGate, ContextSource, Generator, Verifier};
    use crate::isolation::VersionControl;
    use std::time::Duration;

    #[tokio::test]
    async fn test_mock_generator_script_then_fallback() {
        let generator = MockGenerator::new()
            .then("first")
            .then_fail("boom")
            .repeat("# filename: a.sh\nexit 0\n");

        assert_eq!(
            generator.generate("p", "", 0.7).await.unwrap().transcript,
            "first"
        );
        assert!(generator.generate("p", "", 1.0).await.is_err());
        let third = generator.generate("p", "", 1.3).await.unwrap();
        assert_eq!(third.blocks.len(), 1);
        assert_eq!(generator.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_generator_exhausted() {
        let generator = MockGenerator::new();
        let err = generator.generate("p", "", 0.7).await.unwrap_err();
        assert!(err.to_string().contains("exhausted"));
    }

    #[tokio::test]
    async fn test_mock_vcs_records_and_fails() {
        let vcs = MockVersionControl::new();
        vcs.create_branch("task-1").await.unwrap();
        vcs.switch_branch("task-1").await.unwrap();
        assert!(vcs.commit("msg").await);
        assert_eq!(vcs.branches(), vec!["task-1"]);
        assert_eq!(vcs.switches(), vec!["task-1"]);

        let broken = MockVersionControl::new().failing_branches().failing_commits();
        assert!(broken.create_branch("x").await.is_err());
        assert!(!broken.commit("msg").await);
        assert_eq!(broken.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_verifier_script() {
        let verifier = MockVerifier::new().then_fail("red");
        assert!(!verifier.verify().await.unwrap().passed);
        assert!(verifier.verify().await.unwrap().passed);
        assert_eq!(verifier.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_context_and_approval() {
        let context = MockContextSource::new().with_context("ctx");
        assert_eq!(context.fetch("q").await.unwrap(), "ctx");
        assert_eq!(context.queries(), vec!["q"]);

        let gate = MockApproval::new().with_decision(ApprovalDecision::Rejected);
        let decision = gate
            .await_approval("summary", Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(decision, ApprovalDecision::Rejected);
        assert_eq!(gate.timeouts(), vec![Duration::from_secs(3)]);
    }

    #[test]
    fn test_memory_activity_log() {
        let log = MemoryActivityLog::new();
        emit(&log, "t", 0, ActivityStatus::Paused, "");
        assert_eq!(log.statuses(), vec![ActivityStatus::Paused]);
        assert_eq!(log.events()[0].task_id, "t");
    }

    #[test]
    fn test_fixture_layout() {
        let project = TestProject::new();
        project.write_plan("- [ ] build the thing\n");
        assert!(project.state_dir().join("plan.md").exists());
        assert!(project.path().is_dir());
    }
}
