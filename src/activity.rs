//! Append-only activity log.
//!
//! Each orchestrator transition and task-runner outcome becomes one JSON line
//! in `logs/activity.jsonl`, which the dashboard and `conductor status` tail.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Activity file name under the log directory.
pub const ACTIVITY_FILE: &str = "activity.jsonl";

/// `task_id` used for events raised by the orchestrator itself.
pub const ORCHESTRATOR_ID: &str = "orchestrator";

/// Closed set of activity statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityStatus {
    Started,
    Running,
    Completed,
    Failed,
    LoopDetected,
    CheckpointCreated,
    Paused,
    Resumed,
    Error,
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "STARTED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::LoopDetected => "LOOP_DETECTED",
            Self::CheckpointCreated => "CHECKPOINT_CREATED",
            Self::Paused => "PAUSED",
            Self::Resumed => "RESUMED",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One activity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub ts: DateTime<Utc>,
    pub task_id: String,
    pub iteration: u32,
    pub status: ActivityStatus,
    pub details: String,
}

impl ActivityEvent {
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        iteration: u32,
        status: ActivityStatus,
        details: impl Into<String>,
    ) -> Self {
        Self {
            ts: Utc::now(),
            task_id: task_id.into(),
            iteration,
            status,
            details: details.into(),
        }
    }
}

/// Destination for activity records.
pub trait ActivitySink: Send + Sync {
    /// Append one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be persisted.
    fn record(&self, event: &ActivityEvent) -> Result<()>;
}

/// Record an event, downgrading sink failures to a warning.
pub fn emit(
    sink: &dyn ActivitySink,
    task_id: &str,
    iteration: u32,
    status: ActivityStatus,
    details: impl Into<String>,
) {
    let event = ActivityEvent::new(task_id, iteration, status, details);
    if let Err(e) = sink.record(&event) {
        warn!("Failed to record activity {}: {e:#}", event.status);
    }
}

/// JSONL file sink.
#[derive(Debug, Clone)]
pub struct JsonlActivityLog {
    path: PathBuf,
}

impl JsonlActivityLog {
    /// Log at `<log_dir>/activity.jsonl`.
    #[must_use]
    pub fn new(log_dir: impl AsRef<Path>) -> Self {
        Self {
            path: log_dir.as_ref().join(ACTIVITY_FILE),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every well-formed record, skipping lines that fail to parse.
    pub fn read_all(&self) -> Result<Vec<ActivityEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path).context("Failed to open activity log")?;
        Ok(BufReader::new(file)
            .lines()
            .map_while(std::result::Result::ok)
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect())
    }

    /// The most recent `n` records, oldest first.
    pub fn tail(&self, n: usize) -> Result<Vec<ActivityEvent>> {
        let mut events = self.read_all()?;
        let skip = events.len().saturating_sub(n);
        Ok(events.split_off(skip))
    }
}

impl ActivitySink for JsonlActivityLog {
    fn record(&self, event: &ActivityEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create log directory")?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let json = serde_json::to_string(event)?;
        writeln!(file, "{json}")?;
        Ok(())
    }
}
