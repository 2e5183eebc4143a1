//! Plan approval gates.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use super::{ApprovalDecision, ApprovalGate};

/// File the operator writes `approve` or `reject` into.
pub const APPROVAL_FILE: &str = "approval";

/// File holding the plan summary while a decision is pending.
pub const PENDING_APPROVAL_FILE: &str = "pending_approval.md";

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Polls `<state_dir>/approval` for the operator's answer.
#[derive(Debug, Clone)]
pub struct FileApproval {
    state_dir: PathBuf,
    poll_interval: Duration,
}

impl FileApproval {
    #[must_use]
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
            poll_interval: POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn answer_path(&self) -> PathBuf {
        self.state_dir.join(APPROVAL_FILE)
    }

    fn pending_path(&self) -> PathBuf {
        self.state_dir.join(PENDING_APPROVAL_FILE)
    }

    fn read_answer(&self) -> Option<ApprovalDecision> {
        let raw = fs::read_to_string(self.answer_path()).ok()?;
        let answer = raw.trim().to_ascii_lowercase();
        if answer.starts_with("approve") {
            Some(ApprovalDecision::Approved)
        } else if answer.starts_with("reject") {
            Some(ApprovalDecision::Rejected)
        } else {
            None
        }
    }

    fn clear(&self) {
        let _ = fs::remove_file(self.answer_path());
        let _ = fs::remove_file(self.pending_path());
    }
}

#[async_trait]
impl ApprovalGate for FileApproval {
    async fn await_approval(&self, summary: &str, timeout: Duration) -> Result<ApprovalDecision> {
        fs::create_dir_all(&self.state_dir).context("Failed to create state directory")?;
        // An answer left over from an earlier plan does not count.
        let _ = fs::remove_file(self.answer_path());
        fs::write(self.pending_path(), summary).context("Failed to write pending approval")?;
        info!(
            "Waiting up to {}s for plan approval (conductor approve | conductor reject)",
            timeout.as_secs()
        );

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(decision) = self.read_answer() {
                self.clear();
                return Ok(decision);
            }
            let now = Instant::now();
            if now >= deadline {
                self.clear();
                return Ok(ApprovalDecision::TimedOut);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

/// Approves every plan immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn await_approval(&self, _summary: &str, _timeout: Duration) -> Result<ApprovalDecision> {
        Ok(ApprovalDecision::Approved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_times_out_without_answer() {
        let dir = TempDir::new().unwrap();
        let gate = FileApproval::new(dir.path()).with_poll_interval(Duration::from_millis(10));
        let decision = gate
            .await_approval("plan", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(decision, ApprovalDecision::TimedOut);
        assert!(!dir.path().join(PENDING_APPROVAL_FILE).exists());
    }

    #[tokio::test]
    async fn test_reads_answer_written_while_waiting() {
        let dir = TempDir::new().unwrap();
        let gate = FileApproval::new(dir.path()).with_poll_interval(Duration::from_millis(10));
        let answer = dir.path().join(APPROVAL_FILE);

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            fs::write(answer, "Reject\n").unwrap();
        });
        let decision = gate
            .await_approval("plan", Duration::from_secs(5))
            .await
            .unwrap();
        writer.await.unwrap();

        assert_eq!(decision, ApprovalDecision::Rejected);
        assert!(!dir.path().join(APPROVAL_FILE).exists());
    }

    #[tokio::test]
    async fn test_stale_answer_is_discarded() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(APPROVAL_FILE), "approve").unwrap();
        let gate = FileApproval::new(dir.path()).with_poll_interval(Duration::from_millis(10));
        let decision = gate
            .await_approval("plan", Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(decision, ApprovalDecision::TimedOut);
    }

    #[tokio::test]
    async fn test_auto_approve() {
        let decision = AutoApprove
            .await_approval("plan", Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(decision, ApprovalDecision::Approved);
    }
}
