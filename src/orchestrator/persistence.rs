//! Atomic file storage for run state, status snapshots, and checkpoints.
//!
//! Writers take an exclusive `fs2` lock on a sidecar lock file, write to a
//! temporary file, sync, and rename over the target, so readers (including
//! `conductor status` in another process) never see a partial record.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::state::{ComplexityMode, RunState, State};
use crate::error::{ConductorError, Result};

/// Paused session record.
pub const SESSION_FILE: &str = "session.json";
/// Read-only snapshot for observers.
pub const STATUS_FILE: &str = "status.json";
/// Checkpoint directory under the state directory.
pub const CHECKPOINT_DIR: &str = "checkpoints";

const TMP_SUFFIX: &str = ".tmp";
const LOCK_SUFFIX: &str = ".lock";

/// What observers see of a running orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: State,
    pub complexity_mode: ComplexityMode,
    pub iteration_count: u32,
    pub retry_count: u32,
    pub elapsed_secs: f64,
    pub max_iterations: u32,
    pub max_time_minutes: f64,
    #[serde(default)]
    pub last_task: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// File layout rooted at the project's state directory.
#[derive(Debug, Clone)]
pub struct StatePersistence {
    dir: PathBuf,
}

impl StatePersistence {
    #[must_use]
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: state_dir.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    #[must_use]
    pub fn status_path(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }

    #[must_use]
    pub fn checkpoint_path(&self, label: &str) -> PathBuf {
        self.dir.join(CHECKPOINT_DIR).join(format!("{label}.json"))
    }

    /// Write the paused session record.
    pub fn save_session(&self, record: &RunState) -> Result<PathBuf> {
        let path = self.session_path();
        write_atomic(&path, record)?;
        Ok(path)
    }

    /// Delete the paused session record, returning whether one existed.
    pub fn clear_session(&self) -> Result<bool> {
        match fs::remove_file(self.session_path()) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the paused session record.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Resume`] when the record is missing,
    /// unreadable, or from a newer schema.
    pub fn load_session(&self) -> Result<RunState> {
        let path = self.session_path();
        let record: RunState = match read_locked(&path) {
            Ok(Some(record)) => record,
            Ok(None) => return Err(ConductorError::resume(&path, "no saved session")),
            Err(e) => return Err(ConductorError::resume(&path, e.to_string())),
        };
        if !record.is_version_compatible() {
            return Err(ConductorError::resume(
                &path,
                format!("unsupported record version {}", record.version),
            ));
        }
        Ok(record)
    }

    pub fn write_status(&self, status: &StatusSnapshot) -> Result<()> {
        write_atomic(&self.status_path(), status)
    }

    /// Read the status snapshot; a corrupt file reads as absent.
    pub fn read_status(&self) -> Result<Option<StatusSnapshot>> {
        let path = self.status_path();
        match read_locked(&path) {
            Ok(status) => Ok(status),
            Err(ConductorError::Json(e)) => {
                warn!("Corrupted status file at {}: {e}", path.display());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn save_checkpoint(&self, label: &str, record: &RunState) -> Result<PathBuf> {
        let path = self.checkpoint_path(label);
        write_atomic(&path, record)?;
        Ok(path)
    }

    /// Load a checkpoint; unknown or corrupt labels read as absent.
    pub fn load_checkpoint(&self, label: &str) -> Result<Option<RunState>> {
        let path = self.checkpoint_path(label);
        match read_locked(&path) {
            Ok(record) => Ok(record),
            Err(ConductorError::Json(e)) => {
                warn!("Corrupted checkpoint at {}: {e}", path.display());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Checkpoint labels, sorted.
    pub fn list_checkpoints(&self) -> Result<Vec<String>> {
        let dir = self.dir.join(CHECKPOINT_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut labels: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".json").map(str::to_string)
            })
            .collect();
        labels.sort();
        Ok(labels)
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let lock_file = File::create(sidecar(path, LOCK_SUFFIX))?;
    FileExt::lock_exclusive(&lock_file)?;

    let tmp_path = sidecar(path, TMP_SUFFIX);
    let json = serde_json::to_string_pretty(value)?;
    let mut tmp_file = File::create(&tmp_path)?;
    tmp_file.write_all(json.as_bytes())?;
    tmp_file.sync_all()?;
    fs::rename(&tmp_path, path)?;

    debug!("Wrote {}", path.display());
    Ok(())
}

fn read_locked<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let lock_path = sidecar(path, LOCK_SUFFIX);
    // Held until the read completes.
    let _lock = if lock_path.exists() {
        let lock_file = File::open(&lock_path)?;
        FileExt::lock_shared(&lock_file)?;
        Some(lock_file)
    } else {
        None
    };

    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&contents)?))
}
