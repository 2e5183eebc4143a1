//! Branch isolation for task attempts.
//!
//! [`IsolationClient`] composes two [`BranchBackend`]s: an optional loopback
//! control service tried first, and the `git` subprocess as the fallback.
//! Branch names are sanitized before either backend sees them.

mod git;
mod service;

pub use git::GitBackend;
pub use service::{is_loopback_url, ServiceBackend};

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ConductorError, Result};

/// Maximum length of a sanitized branch name.
pub const MAX_BRANCH_LEN: usize = 50;

/// Default control service address.
pub const DEFAULT_SERVICE_URL: &str = "http://127.0.0.1:8080";

/// Keep only `[A-Za-z0-9_-]` and truncate to [`MAX_BRANCH_LEN`].
///
/// ```
/// use conductor::isolation::sanitize_branch_name;
///
/// assert_eq!(sanitize_branch_name("../../etc/passwd"), "etcpasswd");
/// assert_eq!(sanitize_branch_name("task-1a2b3c4d"), "task-1a2b3c4d");
/// ```
#[must_use]
pub fn sanitize_branch_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(MAX_BRANCH_LEN)
        .collect()
}

/// Isolation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    /// Control service base URL; must be loopback. `None` disables it.
    pub service_url: Option<String>,
    pub service_timeout_secs: u64,
    pub git_timeout_secs: u64,
    /// Skip the control service entirely.
    pub offline: bool,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            service_url: Some(DEFAULT_SERVICE_URL.to_string()),
            service_timeout_secs: 5,
            git_timeout_secs: 10,
            offline: false,
        }
    }
}

/// One version-control operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsOp {
    CreateBranch(String),
    SwitchBranch(String),
    Commit(String),
}

impl VcsOp {
    /// Short operation name used in logs and errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateBranch(_) => "create_branch",
            Self::SwitchBranch(_) => "switch_branch",
            Self::Commit(_) => "commit",
        }
    }
}

impl fmt::Display for VcsOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateBranch(b) => write!(f, "create branch {b}"),
            Self::SwitchBranch(b) => write!(f, "switch to {b}"),
            Self::Commit(m) => write!(f, "commit \"{m}\""),
        }
    }
}

/// A way of carrying out [`VcsOp`]s.
#[async_trait]
pub trait BranchBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Perform one operation.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Isolation`] or [`ConductorError::Timeout`]
    /// when the operation did not take effect.
    async fn apply(&self, op: &VcsOp) -> Result<()>;
}

/// Branch and commit operations as the task runner sees them.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Create a branch. The caller decides whether failure is fatal.
    async fn create_branch(&self, name: &str) -> Result<()>;

    /// Check out an existing branch.
    async fn switch_branch(&self, name: &str) -> Result<()>;

    /// Stage everything and commit. Failures are logged, never raised;
    /// returns whether a commit was made.
    async fn commit(&self, message: &str) -> bool;
}

/// Two-strategy dispatcher: service first, `git` second.
pub struct IsolationClient {
    primary: Option<Box<dyn BranchBackend>>,
    fallback: Box<dyn BranchBackend>,
}

impl fmt::Debug for IsolationClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolationClient")
            .field("primary", &self.primary.as_ref().map(|b| b.name()))
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

impl IsolationClient {
    /// Compose backends explicitly.
    #[must_use]
    pub fn new(primary: Option<Box<dyn BranchBackend>>, fallback: Box<dyn BranchBackend>) -> Self {
        Self { primary, fallback }
    }

    /// Build the standard pair from configuration for the repository at `repo`.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::InvalidConfig`] if the service URL is not
    /// loopback, or if the HTTP client cannot be constructed.
    pub fn from_config(config: &IsolationConfig, repo: &Path) -> Result<Self> {
        let primary: Option<Box<dyn BranchBackend>> = match (&config.service_url, config.offline)
        {
            (Some(url), false) => Some(Box::new(ServiceBackend::new(
                url,
                config.service_timeout_secs,
            )?)),
            (Some(_), true) => {
                debug!("offline mode: control service disabled");
                None
            }
            (None, _) => None,
        };
        Ok(Self::new(
            primary,
            Box::new(GitBackend::new(repo, config.git_timeout_secs)),
        ))
    }

    async fn dispatch(&self, op: VcsOp) -> Result<()> {
        if let Some(primary) = &self.primary {
            match primary.apply(&op).await {
                Ok(()) => {
                    debug!(backend = primary.name(), "{op}");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "{} unavailable for {}, falling back to {}: {e}",
                        primary.name(),
                        op.name(),
                        self.fallback.name()
                    );
                }
            }
        }
        self.fallback.apply(&op).await
    }
}

#[async_trait]
impl VersionControl for IsolationClient {
    async fn create_branch(&self, name: &str) -> Result<()> {
        let branch = sanitize_branch_name(name);
        if branch.is_empty() {
            return Err(ConductorError::isolation(
                "create_branch",
                format!("branch name {name:?} is empty after sanitizing"),
            ));
        }
        self.dispatch(VcsOp::CreateBranch(branch.clone())).await?;
        info!("Created branch {branch}");
        Ok(())
    }

    async fn switch_branch(&self, name: &str) -> Result<()> {
        let branch = sanitize_branch_name(name);
        if branch.is_empty() {
            return Err(ConductorError::isolation(
                "switch_branch",
                format!("branch name {name:?} is empty after sanitizing"),
            ));
        }
        self.dispatch(VcsOp::SwitchBranch(branch)).await
    }

    async fn commit(&self, message: &str) -> bool {
        match self.dispatch(VcsOp::Commit(message.to_string())).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Commit failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        name: &'static str,
        fail: bool,
        seen: Arc<Mutex<Vec<VcsOp>>>,
    }

    #[async_trait]
    impl BranchBackend for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn apply(&self, op: &VcsOp) -> Result<()> {
            self.seen.lock().unwrap().push(op.clone());
            if self.fail {
                Err(ConductorError::isolation(op.name(), "refused"))
            } else {
                Ok(())
            }
        }
    }

    fn recorder(name: &'static str, fail: bool) -> Recorder {
        Recorder {
            name,
            fail,
            seen: Arc::default(),
        }
    }

    #[test]
    fn test_sanitize_strips_traversal() {
        assert_eq!(sanitize_branch_name("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_branch_name("feat/x y;rm -rf"), "featxyrm-rf");
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_branch_name(&long).len(), 50);
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let primary = recorder("service", false);
        let fallback = recorder("git", false);
        let client = IsolationClient::new(
            Some(Box::new(primary.clone())),
            Box::new(fallback.clone()),
        );

        client.create_branch("task-abc").await.unwrap();

        assert_eq!(primary.seen.lock().unwrap().len(), 1);
        assert!(fallback.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_primary_failure_falls_back() {
        let primary = recorder("service", true);
        let fallback = recorder("git", false);
        let client = IsolationClient::new(
            Some(Box::new(primary.clone())),
            Box::new(fallback.clone()),
        );

        client.switch_branch("task-abc").await.unwrap();

        assert_eq!(
            fallback.seen.lock().unwrap().as_slice(),
            &[VcsOp::SwitchBranch("task-abc".into())]
        );
    }

    #[tokio::test]
    async fn test_fallback_failure_is_fatal_for_create() {
        let client = IsolationClient::new(None, Box::new(recorder("git", true)));
        let err = client.create_branch("task-abc").await.unwrap_err();
        assert!(matches!(err, ConductorError::Isolation { .. }));
    }

    #[tokio::test]
    async fn test_commit_failure_is_swallowed() {
        let client = IsolationClient::new(
            Some(Box::new(recorder("service", true))),
            Box::new(recorder("git", true)),
        );
        assert!(!client.commit("Auto-commit task abc").await);
    }

    #[tokio::test]
    async fn test_branch_names_are_sanitized_before_dispatch() {
        let fallback = recorder("git", false);
        let client = IsolationClient::new(None, Box::new(fallback.clone()));
        client.create_branch("../task;1").await.unwrap();
        assert_eq!(
            fallback.seen.lock().unwrap()[0],
            VcsOp::CreateBranch("task1".into())
        );
    }

    #[tokio::test]
    async fn test_empty_branch_name_rejected() {
        let client = IsolationClient::new(None, Box::new(recorder("git", false)));
        assert!(client.create_branch("../..").await.is_err());
    }

    #[test]
    fn test_from_config_offline_disables_service() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = IsolationConfig {
            offline: true,
            ..IsolationConfig::default()
        };
        let client = IsolationClient::from_config(&config, dir.path()).unwrap();
        assert!(client.primary.is_none());
    }

    #[test]
    fn test_from_config_rejects_remote_service() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = IsolationConfig {
            service_url: Some("http://example.com:8080".into()),
            ..IsolationConfig::default()
        };
        assert!(IsolationClient::from_config(&config, dir.path()).is_err());
    }
}
