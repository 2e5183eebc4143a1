//! Orchestrator states, complexity modes, and the persisted run record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::guardian::GuardianSnapshot;

/// Current schema version of [`RunState`].
pub const RUN_STATE_VERSION: u32 = 1;

/// Workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Planning,
    Building,
    Verifying,
    Debugging,
    Complete,
    Failed,
}

impl State {
    /// `Complete` and `Failed` end the run.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Building => "building",
            Self::Verifying => "verifying",
            Self::Debugging => "debugging",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planning" => Ok(Self::Planning),
            "building" => Ok(Self::Building),
            "verifying" => Ok(Self::Verifying),
            "debugging" => Ok(Self::Debugging),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown state: {other}")),
        }
    }
}

/// How much ceremony precedes building.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityMode {
    /// Minimal plan, no approval.
    Fast,
    /// Structured spec and plan, operator approval.
    #[default]
    Streamlined,
    /// Streamlined plus verification gates.
    Full,
}

impl ComplexityMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Streamlined => "streamlined",
            Self::Full => "full",
        }
    }

    /// Whether planning waits for operator approval.
    #[must_use]
    pub fn requires_approval(self) -> bool {
        !matches!(self, Self::Fast)
    }
}

impl fmt::Display for ComplexityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplexityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "streamlined" => Ok(Self::Streamlined),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown complexity mode: {other}")),
        }
    }
}

/// Persisted run record, written on pause and checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub current_state: State,
    pub complexity_mode: ComplexityMode,
    pub guardian_snapshot: GuardianSnapshot,
    /// Wall-clock time of the write; informational only.
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub prompt: String,
}

fn default_version() -> u32 {
    RUN_STATE_VERSION
}

impl RunState {
    #[must_use]
    pub fn is_version_compatible(&self) -> bool {
        self.version <= RUN_STATE_VERSION
    }
}
